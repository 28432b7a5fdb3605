#[cfg(test)]
mod tests {
    use crate::agent::action::NextAction;
    use crate::agent::state::{
        AgentState, ChatMessage, ChatRole, DatasetArtifact, StepKind, StepResult,
    };
    use serde_json::json;

    fn sample_artifact() -> DatasetArtifact {
        DatasetArtifact {
            location: "/tmp/query_result_ab12cd34.csv".to_string(),
            row_count: 12,
            columns: vec!["tool".to_string(), "recipe".to_string()],
            sample_preview: Vec::new(),
        }
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = AgentState::new("Is 8950XR-P1 healthy?");

        assert_eq!(state.user_query, "Is 8950XR-P1 healthy?");
        assert!(state.pending_action.is_none());
        assert!(state.action_queue.is_empty());
        assert!(state.step_results.is_empty());
        assert_eq!(state.loop_count, 0);
        assert!(!state.subsystem_mode);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_record_step_appends_and_clears_pending() {
        let mut state = AgentState::new("q");
        state.pending_action = Some(NextAction::DomainInterpretation);

        state.record_step(StepResult::success(
            StepKind::SqlAnalysis,
            "drift computed",
            json!({"rows": 3}),
        ));

        assert_eq!(state.step_results.len(), 1);
        assert!(state.pending_action.is_none());

        state.record_step(StepResult::failure(StepKind::Visualization, "no dataset"));
        assert_eq!(state.step_results.len(), 2);
        assert!(state.step_results[0].error.is_none());
        assert!(state.step_results[1].is_error());
    }

    #[test]
    fn test_register_artifact_is_write_once() {
        let mut state = AgentState::new("q");

        assert!(state.register_artifact("query_result_1", sample_artifact()));
        assert!(!state.register_artifact("query_result_1", DatasetArtifact {
            location: "/tmp/other.csv".to_string(),
            row_count: 99,
            columns: vec![],
            sample_preview: Vec::new(),
        }));

        let kept = &state.data_artifacts["query_result_1"];
        assert_eq!(kept.row_count, 12);
    }

    #[test]
    fn test_recent_digest_caps_window() {
        let mut state = AgentState::new("q");
        for i in 0..7 {
            state.record_step(StepResult::success(
                StepKind::SqlAnalysis,
                format!("step {}", i),
                serde_json::Value::Null,
            ));
        }

        let digest = state.recent_digest(5);
        let lines: Vec<&str> = digest.lines().collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "sql_analysis: step 2");
        assert_eq!(lines[4], "sql_analysis: step 6");
    }

    #[test]
    fn test_decisive_doc_result_requires_hits() {
        let mut state = AgentState::new("q");
        assert!(!state.has_decisive_doc_result());

        state.record_step(StepResult::success(
            StepKind::DocumentSearch,
            "no hits",
            json!({"hits": []}),
        ));
        assert!(!state.has_decisive_doc_result());

        state.record_step(StepResult::success(
            StepKind::DocumentSearch,
            "2 hits",
            json!({"hits": [{"id": "a"}, {"id": "b"}]}),
        ));
        assert!(state.has_decisive_doc_result());
    }

    #[test]
    fn test_decisive_doc_result_ignores_errors() {
        let mut state = AgentState::new("q");
        let mut failed = StepResult::failure(StepKind::DocumentSearch, "index missing");
        failed.detail = json!({"hits": [{"id": "a"}]});
        state.record_step(failed);

        assert!(!state.has_decisive_doc_result());
    }

    #[test]
    fn test_terminal_states() {
        let mut answered = AgentState::new("q");
        answered.final_answer = Some("All good.".to_string());
        assert!(answered.is_terminal());

        let mut asking = AgentState::new("q");
        asking.pending_clarification = Some(crate::agent::state::ClarificationRequest {
            id: "tool".to_string(),
            question: "Which tool?".to_string(),
        });
        assert!(asking.is_terminal());
    }

    #[test]
    fn test_chat_message_constructors() {
        let user = ChatMessage::user("hello");
        let assistant = ChatMessage::assistant("hi");

        assert_eq!(user.role, ChatRole::User);
        assert_eq!(assistant.role, ChatRole::Assistant);
        assert_eq!(user.content, "hello");
        assert_eq!(assistant.content, "hi");
    }

    #[test]
    fn test_step_kind_display_names() {
        assert_eq!(StepKind::SqlAnalysis.to_string(), "sql_analysis");
        assert_eq!(
            StepKind::DomainInterpretation.to_string(),
            "domain_interpretation"
        );
        assert_eq!(StepKind::DocumentSearch.to_string(), "document_search");
    }
}
