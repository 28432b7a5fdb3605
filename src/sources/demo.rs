//! 演示数据库生成。
//!
//! 生成覆盖三张量测表的14天演示场景：一条仅限单台设备的缺陷漂移
//! （8950XR-P2×SIPLayer）、一条多台设备共同出现的工艺漂移（S13Layer）、
//! 一条逾期的平台校准，以及一组平台坐标超差点，足以走通健康、原因、
//! 子系统与趋势四类提问。

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use rand::Rng;
use rusqlite::{Connection, params};
use std::path::Path;

const TOOLS: [&str; 4] = ["8950XR-P1", "8950XR-P2", "8950XR-P3", "8950XR-P4"];
const RECIPES: [&str; 3] = ["SIPLayer", "S13Layer", "WadiLayer"];
const SUBSYSTEMS: [&str; 4] = ["stage", "camera", "focus", "illumination"];

/// 生成演示数据库（已存在的表会被重建）
pub fn seed_demo(db_path: &Path, today: NaiveDate) -> Result<usize> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open demo database: {:?}", db_path))?;

    conn.execute_batch(
        "DROP TABLE IF EXISTS defects_daily;
         DROP TABLE IF EXISTS calibrations;
         DROP TABLE IF EXISTS wc_points;
         CREATE TABLE defects_daily (
             date TEXT NOT NULL,
             tool TEXT NOT NULL,
             recipe TEXT NOT NULL,
             pre_defectwise_count INTEGER NOT NULL
         );
         CREATE TABLE calibrations (
             tool TEXT NOT NULL,
             subsystem TEXT NOT NULL,
             cal_name TEXT NOT NULL,
             last_cal_date TEXT NOT NULL,
             freq_days INTEGER NOT NULL
         );
         CREATE TABLE wc_points (
             date TEXT NOT NULL,
             tool TEXT NOT NULL,
             recipe TEXT NOT NULL,
             x REAL NOT NULL,
             y REAL NOT NULL
         );",
    )
    .context("Failed to create demo schema")?;

    let mut rng = rand::rng();
    let mut inserted = 0usize;

    // 缺陷日表：近14天，基线在9到11之间小幅起伏，周环比落在10%阈值内；
    // 本周SIPLayer只在P2抬升（设备漂移）、S13Layer在所有设备抬升（工艺漂移）
    for offset in 0..14u64 {
        let date = today
            .checked_sub_days(Days::new(offset))
            .context("demo date out of range")?;
        let in_this_week = offset <= 6;

        for tool in TOOLS {
            for recipe in RECIPES {
                let phase = offset
                    + TOOLS.iter().position(|t| *t == tool).unwrap_or(0) as u64
                    + RECIPES.iter().position(|r| *r == recipe).unwrap_or(0) as u64;
                let baseline: i64 = 9 + (phase % 3) as i64;
                let count = match (recipe, in_this_week) {
                    ("SIPLayer", true) if tool == "8950XR-P2" => baseline * 3,
                    ("S13Layer", true) => baseline * 2,
                    _ => baseline,
                };

                conn.execute(
                    "INSERT INTO defects_daily (date, tool, recipe, pre_defectwise_count) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![date.format("%Y-%m-%d").to_string(), tool, recipe, count],
                )?;
                inserted += 1;
            }
        }
    }

    // 校准表：默认全部在期内；P2的平台校准严重逾期
    for tool in TOOLS {
        for subsystem in SUBSYSTEMS {
            let cal_name = format!("{}_periodic_cal", subsystem);
            let (last_cal_offset, freq_days) = if tool == "8950XR-P2" && subsystem == "stage" {
                (90u64, 30i64)
            } else {
                (10u64, 30i64)
            };
            let last_cal_date = today
                .checked_sub_days(Days::new(last_cal_offset))
                .context("demo calibration date out of range")?;

            conn.execute(
                "INSERT INTO calibrations (tool, subsystem, cal_name, last_cal_date, freq_days) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    tool,
                    subsystem,
                    cal_name,
                    last_cal_date.format("%Y-%m-%d").to_string(),
                    freq_days
                ],
            )?;
            inserted += 1;
        }
    }

    // 坐标点表：本周每天每台设备20个点；P2约两成的点x超出±150规格
    for offset in 0..7u64 {
        let date = today
            .checked_sub_days(Days::new(offset))
            .context("demo date out of range")?;

        for tool in TOOLS {
            for point_idx in 0..20 {
                let out_of_spec = tool == "8950XR-P2" && point_idx % 5 == 0;
                let x: f64 = if out_of_spec {
                    rng.random_range(160.0..190.0)
                } else {
                    rng.random_range(-120.0..120.0)
                };
                let y: f64 = rng.random_range(-120.0..120.0);

                conn.execute(
                    "INSERT INTO wc_points (date, tool, recipe, x, y) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        date.format("%Y-%m-%d").to_string(),
                        tool,
                        "SIPLayer",
                        x,
                        y
                    ],
                )?;
                inserted += 1;
            }
        }
    }

    Ok(inserted)
}
