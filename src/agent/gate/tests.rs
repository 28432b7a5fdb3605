#[cfg(test)]
mod tests {
    use crate::agent::gate::{PendingTurn, SessionMemory, admit};
    use crate::agent::state::ClarificationRequest;

    fn memory_with_pending() -> SessionMemory {
        SessionMemory {
            pending: Some(PendingTurn {
                clarification: ClarificationRequest {
                    id: "tool".to_string(),
                    question: "Which tool should I check?".to_string(),
                },
                original_query: "Is my tool healthy?".to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_input_passes_through() {
        let mut memory = SessionMemory::default();
        let query = admit(&mut memory, "Is 8950XR-P1 healthy?");

        assert_eq!(query, "Is 8950XR-P1 healthy?");
        assert!(memory.clarification_answers.is_empty());
    }

    #[test]
    fn test_clarification_answer_is_merged_and_query_restored() {
        let mut memory = memory_with_pending();
        let query = admit(&mut memory, "  8950XR-P2 ");

        // 澄清回答子问题，主问题被恢复
        assert_eq!(query, "Is my tool healthy?");
        assert_eq!(
            memory.clarification_answers.get("tool").map(String::as_str),
            Some("8950XR-P2")
        );
        assert!(memory.pending.is_none());
    }

    #[test]
    fn test_answers_accrete_across_turns() {
        let mut memory = memory_with_pending();
        memory
            .clarification_answers
            .insert("range".to_string(), "last week".to_string());

        admit(&mut memory, "P3");

        assert_eq!(memory.clarification_answers.len(), 2);
        assert_eq!(
            memory.clarification_answers.get("range").map(String::as_str),
            Some("last week")
        );
    }
}
