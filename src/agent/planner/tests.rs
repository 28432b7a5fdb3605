#[cfg(test)]
mod tests {
    use crate::agent::action::{NextAction, SqlTemplate};
    use crate::agent::planner::{PlannerOutcome, plan};
    use crate::agent::state::{AgentState, ChatMessage, StepKind, StepResult};
    use serde_json::json;

    fn queue_of(plan: &crate::agent::planner::PlannerPlan) -> &Vec<NextAction> {
        match &plan.outcome {
            PlannerOutcome::Queue(queue) => queue,
            other => panic!("expected queue, got {:?}", other),
        }
    }

    fn template_of(action: &NextAction) -> Option<SqlTemplate> {
        match action {
            NextAction::SqlAnalysis { template, .. } => *template,
            _ => None,
        }
    }

    #[test]
    fn test_health_query_with_tool_builds_drift_queue() {
        let state = AgentState::new("Is 8950XR-P1 healthy?");
        let plan = plan(&state);

        assert_eq!(plan.resolved_tool.as_deref(), Some("8950XR-P1"));
        assert!(!plan.subsystem_mode);

        let queue = queue_of(&plan);
        assert_eq!(queue.len(), 3);
        assert_eq!(template_of(&queue[0]), Some(SqlTemplate::DefectDriftWeekly));
        assert_eq!(queue[1], NextAction::DomainInterpretation);
        assert_eq!(queue[2].name(), "finish");
    }

    #[test]
    fn test_health_query_accepts_short_tool_tag() {
        let state = AgentState::new("is p3 drifting this week");
        let plan = plan(&state);

        assert_eq!(plan.resolved_tool.as_deref(), Some("8950XR-P3"));
    }

    #[test]
    fn test_health_reason_query_adds_supporting_evidence() {
        let state = AgentState::new("Why is 8950XR-P2 unhealthy?");
        let plan = plan(&state);

        let queue = queue_of(&plan);
        assert_eq!(queue.len(), 5);
        assert_eq!(template_of(&queue[0]), Some(SqlTemplate::DefectDriftWeekly));
        assert_eq!(
            template_of(&queue[1]),
            Some(SqlTemplate::CalibrationOverdue)
        );
        assert_eq!(template_of(&queue[2]), Some(SqlTemplate::StageWcWeekly));
        assert_eq!(queue[3], NextAction::DomainInterpretation);
        assert_eq!(queue[4].name(), "finish");
    }

    #[test]
    fn test_health_subsystem_query_scopes_evidence() {
        let state = AgentState::new("Why might P2's stage be unhealthy?");
        let plan = plan(&state);

        assert!(plan.subsystem_mode);
        assert_eq!(plan.resolved_tool.as_deref(), Some("8950XR-P2"));

        let queue = queue_of(&plan);
        assert_eq!(queue.len(), 4);
        assert_eq!(
            template_of(&queue[0]),
            Some(SqlTemplate::CalibrationOverdue)
        );
        assert_eq!(template_of(&queue[1]), Some(SqlTemplate::StageWcWeekly));
        assert_eq!(queue[2], NextAction::DomainInterpretation);
        assert_eq!(queue[3].name(), "finish");
    }

    #[test]
    fn test_health_query_without_tool_asks_user() {
        let state = AgentState::new("Is my inspection tool healthy?");
        let plan = plan(&state);

        match &plan.outcome {
            PlannerOutcome::Immediate(NextAction::AskUser { id, question }) => {
                assert_eq!(id, "tool");
                for tool in crate::agent::planner::TOOL_IDS {
                    assert!(question.contains(tool), "question must list {}", tool);
                }
            }
            other => panic!("expected ask_user, got {:?}", other),
        }
    }

    #[test]
    fn test_query_tool_beats_remembered_tool() {
        let mut state = AgentState::new("Is P2 healthy?");
        state.last_tool = Some("8950XR-P1".to_string());

        let plan = plan(&state);
        assert_eq!(plan.resolved_tool.as_deref(), Some("8950XR-P2"));
    }

    #[test]
    fn test_clarification_answer_beats_remembered_tool() {
        let mut state = AgentState::new("Is it healthy?");
        state
            .clarification_answers
            .insert("tool".to_string(), "8950XR-P4".to_string());
        state.last_tool = Some("8950XR-P1".to_string());

        let plan = plan(&state);
        assert_eq!(plan.resolved_tool.as_deref(), Some("8950XR-P4"));
    }

    #[test]
    fn test_remembered_tool_beats_history() {
        let mut state = AgentState::new("Is it still healthy?");
        state.last_tool = Some("8950XR-P3".to_string());
        state
            .chat_history
            .push(ChatMessage::user("Tell me about 8950XR-P1"));

        let plan = plan(&state);
        assert_eq!(plan.resolved_tool.as_deref(), Some("8950XR-P3"));
    }

    #[test]
    fn test_history_scanned_backwards() {
        let mut state = AgentState::new("And is it healthy now?");
        state
            .chat_history
            .push(ChatMessage::user("First I asked about 8950XR-P1"));
        state
            .chat_history
            .push(ChatMessage::assistant("8950XR-P1 looked stable."));
        state
            .chat_history
            .push(ChatMessage::user("Now switch to 8950XR-P4"));

        let plan = plan(&state);
        assert_eq!(plan.resolved_tool.as_deref(), Some("8950XR-P4"));
    }

    #[test]
    fn test_trend_query_with_range_builds_visualization_queue() {
        let state = AgentState::new("Show the defect trend for P3 from 20240101 to 20240115");
        let plan = plan(&state);

        let queue = queue_of(&plan);
        assert_eq!(queue.len(), 3);
        match &queue[0] {
            NextAction::SqlAnalysis {
                template,
                tool,
                start_date,
                end_date,
                ..
            } => {
                assert_eq!(*template, Some(SqlTemplate::DefectTrendRange));
                assert_eq!(tool.as_deref(), Some("8950XR-P3"));
                assert_eq!(start_date.as_deref(), Some("2024-01-01"));
                assert_eq!(end_date.as_deref(), Some("2024-01-15"));
            }
            other => panic!("expected trend sql action, got {:?}", other),
        }
        match &queue[1] {
            NextAction::Visualization { chart_type, .. } => {
                assert_eq!(chart_type.as_deref(), Some("line"));
            }
            other => panic!("expected visualization, got {:?}", other),
        }
        assert_eq!(queue[2].name(), "finish");
    }

    #[test]
    fn test_trend_range_accepts_tilde_and_swaps_reversed_dates() {
        let state = AgentState::new("plot P1 history 20240131~20240101");
        let plan = plan(&state);

        let queue = queue_of(&plan);
        match &queue[0] {
            NextAction::SqlAnalysis {
                start_date,
                end_date,
                ..
            } => {
                assert_eq!(start_date.as_deref(), Some("2024-01-01"));
                assert_eq!(end_date.as_deref(), Some("2024-01-31"));
            }
            other => panic!("expected trend sql action, got {:?}", other),
        }
    }

    #[test]
    fn test_trend_query_with_invalid_date_declines() {
        // 13月不是合法月份，范围解析失败后规划器放弃
        let state = AgentState::new("plot P1 history 20241301 to 20241305");
        let plan = plan(&state);

        assert_eq!(plan.outcome, PlannerOutcome::Decline);
    }

    #[test]
    fn test_trend_query_without_tool_falls_back_to_adhoc_sql() {
        // 设备号缺失时走不了趋势队列，但"show"+"defect"仍可推断出即席SQL
        let state = AgentState::new("Show the defect trend from 20240101 to 20240115");
        let plan = plan(&state);

        match &plan.outcome {
            PlannerOutcome::Immediate(NextAction::SqlAnalysis { template, .. }) => {
                assert!(template.is_none());
            }
            other => panic!("expected ad-hoc sql action, got {:?}", other),
        }
    }

    #[test]
    fn test_doc_query_builds_search_queue() {
        let state = AgentState::new("How do I recalibrate the stage prealigner?");
        let plan = plan(&state);

        let queue = queue_of(&plan);
        assert_eq!(queue.len(), 2);
        match &queue[0] {
            NextAction::DocumentSearch { query, top_k } => {
                assert_eq!(
                    query.as_deref(),
                    Some("How do I recalibrate the stage prealigner?")
                );
                assert!(top_k.is_none());
            }
            other => panic!("expected document search, got {:?}", other),
        }
        assert_eq!(queue[1].name(), "finish");
    }

    #[test]
    fn test_document_noun_routes_to_search() {
        let state = AgentState::new("Find the document about stage alignment");
        let plan = plan(&state);

        let queue = queue_of(&plan);
        assert_eq!(queue[0].name(), "document_search");
    }

    #[test]
    fn test_spec_sheet_query_routes_to_search() {
        let state = AgentState::new("Where is the P2 spec sheet?");
        let plan = plan(&state);

        let queue = queue_of(&plan);
        assert_eq!(queue[0].name(), "document_search");
        assert_eq!(queue[1].name(), "finish");
    }

    #[test]
    fn test_generic_data_query_runs_adhoc_sql_once() {
        let mut state = AgentState::new("show me defect counts per recipe for P2");

        let first = plan(&state);
        match &first.outcome {
            PlannerOutcome::Immediate(NextAction::SqlAnalysis {
                template,
                question,
                tool,
                tables,
                ..
            }) => {
                assert!(template.is_none());
                assert_eq!(
                    question.as_deref(),
                    Some("show me defect counts per recipe for P2")
                );
                assert_eq!(tool.as_deref(), Some("8950XR-P2"));
                assert_eq!(tables, &vec!["defects_daily".to_string()]);
            }
            other => panic!("expected ad-hoc sql action, got {:?}", other),
        }

        // 有一次成功的即席SQL后不再重复，直接收尾
        state.record_step(StepResult::success(
            StepKind::SqlAnalysis,
            "returned 12 rows",
            json!({"mode": "ad_hoc", "row_count": 12}),
        ));

        let second = plan(&state);
        match &second.outcome {
            PlannerOutcome::Immediate(action) => assert_eq!(action.name(), "finish"),
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_adhoc_sql_allows_retry() {
        let mut state = AgentState::new("show me defect counts per recipe");
        state.record_step(StepResult::failure(
            StepKind::SqlAnalysis,
            "Generated SQL was rejected",
        ));

        let plan = plan(&state);
        match &plan.outcome {
            PlannerOutcome::Immediate(action) => assert_eq!(action.name(), "sql_analysis"),
            other => panic!("expected sql retry, got {:?}", other),
        }
    }

    #[test]
    fn test_unroutable_query_declines() {
        let state = AgentState::new("Tell me something interesting about the fab");
        let plan = plan(&state);

        assert_eq!(plan.outcome, PlannerOutcome::Decline);
        assert!(plan.resolved_tool.is_none());
    }
}
