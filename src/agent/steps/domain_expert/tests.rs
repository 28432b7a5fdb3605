#[cfg(test)]
mod tests {
    use crate::agent::state::{AgentState, StepKind, StepResult};
    use crate::agent::steps::domain_expert::DomainExpertStep;
    use crate::llm::generative::ScriptedGenerative;
    use serde_json::json;
    use std::sync::Arc;

    fn drift_result(tool_health: &str) -> StepResult {
        StepResult::success(
            StepKind::SqlAnalysis,
            format!("Weekly drift: {}", tool_health),
            json!({
                "mode": "template",
                "template": "defect_drift_weekly",
                "tool": "8950XR-P2",
                "tool_health": tool_health,
                "rows": [],
            }),
        )
    }

    fn calibration_result(overdue: bool) -> StepResult {
        let overdue_rows = if overdue {
            json!([
                {"subsystem": "stage", "cal_name": "stage_periodic_cal",
                 "due_date": "2024-03-31", "is_overdue": 1},
            ])
        } else {
            json!([])
        };
        StepResult::success(
            StepKind::SqlAnalysis,
            "Calibrations",
            json!({
                "mode": "template",
                "template": "calibration_overdue",
                "tool": "8950XR-P2",
                "overdue_count": if overdue { 1 } else { 0 },
                "overdue_rows": overdue_rows,
                "subsystems": ["camera", "stage"],
            }),
        )
    }

    fn wc_result(max_ratio: f64) -> StepResult {
        StepResult::success(
            StepKind::SqlAnalysis,
            "Stage coordinates",
            json!({
                "mode": "template",
                "template": "stage_wc_weekly",
                "tool": "8950XR-P2",
                "max_abnormal_ratio": max_ratio,
                "rows": [],
            }),
        )
    }

    fn subsystem_status(detail: &serde_json::Value, name: &str) -> (String, String) {
        let entry = detail["subsystems"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["subsystem"] == name)
            .unwrap_or_else(|| panic!("subsystem {} missing", name));
        (
            entry["status"].as_str().unwrap().to_string(),
            entry["note"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_subsystem_mode_flags_overdue_calibration() {
        let step = DomainExpertStep::new(Arc::new(ScriptedGenerative::new()));
        let mut state = AgentState::new("why might P2's stage be unhealthy?");
        state.subsystem_mode = true;
        state.record_step(calibration_result(true));
        state.record_step(wc_result(0.02));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert!(!result.is_error());
        assert_eq!(result.detail["mode"], "subsystem");
        assert_eq!(result.detail["verdict"], "Unhealthy");

        let (stage_status, stage_note) = subsystem_status(&result.detail, "stage");
        assert_eq!(stage_status, "Unhealthy");
        assert!(stage_note.contains("Overdue"));
        assert!(!stage_note.is_empty());

        let (camera_status, _) = subsystem_status(&result.detail, "camera");
        assert_eq!(camera_status, "Healthy");
    }

    #[tokio::test]
    async fn test_subsystem_mode_reads_overdue_evidence_without_inlined_rows() {
        let step = DomainExpertStep::new(Arc::new(ScriptedGenerative::new()));
        let mut state = AgentState::new("why might P2's stage be unhealthy?");
        state.subsystem_mode = true;
        // 大结果集：SQL步骤不内联rows，只携带逾期行与子系统清单
        state.record_step(StepResult::success(
            StepKind::SqlAnalysis,
            "Calibrations for 8950XR-P2: 1 of 56 overdue.",
            json!({
                "mode": "template",
                "template": "calibration_overdue",
                "tool": "8950XR-P2",
                "row_count": 56,
                "overdue_count": 1,
                "overdue_rows": [
                    {"subsystem": "stage", "cal_name": "stage_periodic_cal",
                     "due_date": "2024-03-31", "is_overdue": 1},
                ],
                "subsystems": ["camera", "focus", "stage"],
            }),
        ));
        state.record_step(wc_result(0.01));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert!(!result.is_error());
        assert_eq!(result.detail["verdict"], "Unhealthy");

        let (stage_status, stage_note) = subsystem_status(&result.detail, "stage");
        assert_eq!(stage_status, "Unhealthy");
        assert!(stage_note.contains("Overdue: stage_periodic_cal"));

        let (focus_status, _) = subsystem_status(&result.detail, "focus");
        assert_eq!(focus_status, "Healthy");
    }

    #[tokio::test]
    async fn test_subsystem_mode_flags_stage_ratio_above_threshold() {
        let step = DomainExpertStep::new(Arc::new(ScriptedGenerative::new()));
        let mut state = AgentState::new("stage health?");
        state.subsystem_mode = true;
        state.record_step(calibration_result(false));
        state.record_step(wc_result(0.20));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert_eq!(result.detail["verdict"], "Unhealthy");
        let (stage_status, stage_note) = subsystem_status(&result.detail, "stage");
        assert_eq!(stage_status, "Unhealthy");
        assert!(stage_note.contains("Out-of-spec position ratio"));
    }

    #[tokio::test]
    async fn test_subsystem_mode_all_healthy() {
        let step = DomainExpertStep::new(Arc::new(ScriptedGenerative::new()));
        let mut state = AgentState::new("stage health?");
        state.subsystem_mode = true;
        state.record_step(calibration_result(false));
        state.record_step(wc_result(0.01));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert_eq!(result.detail["verdict"], "Healthy");
        assert!(result.summary.contains("all subsystems Healthy"));
    }

    #[tokio::test]
    async fn test_subsystem_mode_without_evidence_fails_cleanly() {
        let step = DomainExpertStep::new(Arc::new(ScriptedGenerative::new()));
        let mut state = AgentState::new("stage health?");
        state.subsystem_mode = true;

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_general_mode_verdict_follows_primary_evidence_only() {
        let generative = ScriptedGenerative::new().with_reply("The tool shows isolated drift.");
        let step = DomainExpertStep::new(Arc::new(generative));
        let mut state = AgentState::new("is P2 healthy?");
        state.record_step(drift_result("UNHEALTHY"));
        // 辅助证据全部正常也不能翻转结论
        state.record_step(calibration_result(false));
        state.record_step(wc_result(0.0));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert!(!result.is_error());
        assert_eq!(result.detail["verdict"], "Unhealthy");
        assert_eq!(
            result.detail["narrative"],
            "The tool shows isolated drift."
        );
    }

    #[tokio::test]
    async fn test_general_mode_supporting_evidence_cannot_make_unhealthy() {
        let generative = ScriptedGenerative::new().with_reply("Stable week over week.");
        let step = DomainExpertStep::new(Arc::new(generative));
        let mut state = AgentState::new("is P2 healthy?");
        state.record_step(drift_result("HEALTHY"));
        // 即便校准逾期、比例超标，主证据健康则结论为Healthy
        state.record_step(calibration_result(true));
        state.record_step(wc_result(0.30));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert_eq!(result.detail["verdict"], "Healthy");
        assert_eq!(result.detail["supporting"]["calibration_overdue_count"], 1);
    }

    #[tokio::test]
    async fn test_general_mode_without_drift_evidence_fails_cleanly() {
        let step = DomainExpertStep::new(Arc::new(ScriptedGenerative::new()));
        let mut state = AgentState::new("is P2 healthy?");
        state.record_step(calibration_result(true));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert!(result.is_error());
        assert!(result.summary.contains("No primary drift evidence"));
    }

    #[tokio::test]
    async fn test_general_mode_narrative_failure_keeps_verdict() {
        let generative = ScriptedGenerative::new().with_failure("model down");
        let step = DomainExpertStep::new(Arc::new(generative));
        let mut state = AgentState::new("is P2 healthy?");
        state.record_step(drift_result("UNHEALTHY"));

        step.execute(&mut state).await;

        let result = state.step_results.last().unwrap();
        assert!(result.is_error());
        assert_eq!(result.detail["verdict"], "Unhealthy");
        assert!(result.summary.contains("narrative unavailable"));
    }
}
