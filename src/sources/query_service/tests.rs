#[cfg(test)]
mod tests {
    use crate::sources::query_service::{
        QueryError, SAMPLE_PREVIEW_ROWS, SqliteQueryService,
    };
    use rusqlite::Connection;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn seeded_service(temp_dir: &TempDir) -> SqliteQueryService {
        let db_path = temp_dir.path().join("fab.sqlite");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE defects_daily (date TEXT, tool TEXT, recipe TEXT, pre_defectwise_count INTEGER);
             INSERT INTO defects_daily VALUES
                ('2024-01-01', '8950XR-P1', 'SIPLayer', 10),
                ('2024-01-01', '8950XR-P2', 'SIPLayer', 12),
                ('2024-01-02', '8950XR-P1', 'S13Layer', 7),
                ('2024-01-02', '8950XR-P2', 'S13Layer', 30),
                ('2024-01-03', '8950XR-P1', 'SIPLayer', 11),
                ('2024-01-03', '8950XR-P2', 'WadiLayer', 4),
                ('2024-01-04', '8950XR-P1', 'SIPLayer', 9);",
        )
        .unwrap();

        SqliteQueryService::new(db_path, temp_dir.path().join("runtime"), 1000)
    }

    #[test]
    fn test_normalize_sql_strips_comments_and_semicolon() {
        let sql = "-- leading comment\n-- another\nSELECT 1;";
        assert_eq!(SqliteQueryService::normalize_sql(sql), "SELECT 1");

        let plain = "  SELECT 2  ";
        assert_eq!(SqliteQueryService::normalize_sql(plain), "SELECT 2");
    }

    #[test]
    fn test_is_read_only_accepts_select_and_with() {
        assert!(SqliteQueryService::is_read_only("SELECT * FROM defects_daily"));
        assert!(SqliteQueryService::is_read_only(
            "WITH w AS (SELECT 1) SELECT * FROM w"
        ));
        assert!(SqliteQueryService::is_read_only(
            "-- comment first\nselect tool from calibrations"
        ));

        assert!(!SqliteQueryService::is_read_only(
            "UPDATE calibrations SET freq_days = 1"
        ));
        assert!(!SqliteQueryService::is_read_only(
            "INSERT INTO defects_daily VALUES ('x', 'y', 'z', 1)"
        ));
        assert!(!SqliteQueryService::is_read_only("DROP TABLE wc_points"));
        assert!(!SqliteQueryService::is_read_only(
            "-- harmless looking\nDELETE FROM calibrations"
        ));
    }

    #[test]
    fn test_ensure_limit_appends_only_when_missing() {
        assert_eq!(
            SqliteQueryService::ensure_limit("SELECT 1", 50),
            "SELECT 1 LIMIT 50"
        );
        assert_eq!(
            SqliteQueryService::ensure_limit("SELECT 1 LIMIT 5", 50),
            "SELECT 1 LIMIT 5"
        );
        assert_eq!(
            SqliteQueryService::ensure_limit("SELECT 1 limit 5", 50),
            "SELECT 1 limit 5"
        );
    }

    #[test]
    fn test_execute_returns_rows_and_persists_csv() {
        let temp_dir = TempDir::new().unwrap();
        let service = seeded_service(&temp_dir);

        let result = service
            .execute("SELECT tool, recipe, pre_defectwise_count FROM defects_daily WHERE tool = '8950XR-P1' ORDER BY date")
            .unwrap();

        assert!(result.dataset_id.starts_with("query_result_"));
        assert_eq!(result.columns, vec!["tool", "recipe", "pre_defectwise_count"]);
        assert_eq!(result.row_count, 4);
        assert_eq!(result.rows.len(), 4);
        assert_eq!(
            result.rows[0].get("tool").and_then(|v| v.as_str()),
            Some("8950XR-P1")
        );

        // CSV与返回的行数、列名一致
        let csv_content = std::fs::read_to_string(&result.csv_path).unwrap();
        let mut lines = csv_content.lines();
        assert_eq!(lines.next(), Some("tool,recipe,pre_defectwise_count"));
        assert_eq!(lines.count(), 4);
    }

    #[test]
    fn test_sample_preview_is_capped() {
        let temp_dir = TempDir::new().unwrap();
        let service = seeded_service(&temp_dir);

        let result = service.execute("SELECT * FROM defects_daily").unwrap();

        assert_eq!(result.row_count, 7);
        assert_eq!(result.sample_preview().len(), SAMPLE_PREVIEW_ROWS);
    }

    #[test]
    fn test_execute_applies_row_limit() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("fab.sqlite");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE defects_daily (date TEXT, tool TEXT, recipe TEXT, pre_defectwise_count INTEGER);",
        )
        .unwrap();
        for i in 0..20 {
            conn.execute(
                "INSERT INTO defects_daily VALUES ('2024-01-01', '8950XR-P1', ?1, 1)",
                [format!("recipe-{}", i)],
            )
            .unwrap();
        }

        let service = SqliteQueryService::new(db_path, temp_dir.path().join("runtime"), 5);
        let result = service.execute("SELECT * FROM defects_daily").unwrap();

        assert_eq!(result.row_count, 5);
    }

    #[test]
    fn test_execute_with_named_params() {
        let temp_dir = TempDir::new().unwrap();
        let service = seeded_service(&temp_dir);

        let tool = "8950XR-P2".to_string();
        let result = service
            .execute_with_params(
                "SELECT recipe FROM defects_daily WHERE tool = :tool ORDER BY recipe",
                &[(":tool", &tool)],
            )
            .unwrap();

        assert_eq!(result.row_count, 3);
        assert_eq!(
            result.rows[0].get("recipe").and_then(|v| v.as_str()),
            Some("S13Layer")
        );
    }

    #[test]
    fn test_execute_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let service = seeded_service(&temp_dir);

        let err = service
            .execute("DELETE FROM defects_daily")
            .unwrap_err();
        assert!(matches!(err, QueryError::NotReadOnly));
    }

    #[test]
    fn test_cte_masked_write_fails_on_readonly_connection() {
        let temp_dir = TempDir::new().unwrap();
        let service = seeded_service(&temp_dir);

        // 以WITH开头的写语句能过关键字检查，但只读连接会拒绝执行
        let result = service.execute(
            "WITH doomed AS (SELECT 1) INSERT INTO defects_daily SELECT '2024-01-05', 'x', 'y', 1",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_execute_on_missing_database_errors() {
        let service = SqliteQueryService::new(
            PathBuf::from("/nonexistent/fab.sqlite"),
            PathBuf::from("/tmp/fabscope-test-runtime"),
            100,
        );

        assert!(service.execute("SELECT 1").is_err());
    }
}
