#[cfg(test)]
mod tests {
    use crate::agent::state::{AgentState, StepKind, StepResult};
    use crate::agent::steps::synthesis::synthesize_final_answer;
    use crate::llm::generative::ScriptedGenerative;
    use serde_json::json;

    #[tokio::test]
    async fn test_prompt_carries_evidence_and_clarifications() {
        let generative = ScriptedGenerative::new().with_reply("8950XR-P2 is unhealthy.");
        let mut state = AgentState::new("Is my tool healthy?");
        state
            .clarification_answers
            .insert("tool".to_string(), "8950XR-P2".to_string());
        state.record_step(StepResult::success(
            StepKind::DomainInterpretation,
            "8950XR-P2 is Unhealthy based on weekly drift.",
            json!({"verdict": "Unhealthy"}),
        ));

        let answer = synthesize_final_answer(&generative, &state, None, None)
            .await
            .unwrap();
        assert_eq!(answer, "8950XR-P2 is unhealthy.");

        let prompts = generative.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("Is my tool healthy?"));
        assert!(prompts[0].contains("Unhealthy based on weekly drift"));
        assert!(prompts[0].contains("verdict: \"Unhealthy\""));
        assert!(prompts[0].contains("tool: 8950XR-P2"));
    }

    #[tokio::test]
    async fn test_failed_steps_surface_as_caveats_not_raw_errors() {
        let generative = ScriptedGenerative::new().with_reply("answer");
        let mut state = AgentState::new("trend?");
        state.record_step(StepResult::failure(
            StepKind::SqlAnalysis,
            "Malformed date range: x .. y",
        ));

        synthesize_final_answer(&generative, &state, None, None)
            .await
            .unwrap();

        let prompts = generative.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("(failed: Malformed date range"));
    }

    #[tokio::test]
    async fn test_raw_decision_text_is_passed_through() {
        let generative = ScriptedGenerative::new().with_reply("answer");
        let state = AgentState::new("odd question");

        synthesize_final_answer(
            &generative,
            &state,
            Some("decision response was not parseable"),
            Some("The defect table looks fine to me."),
        )
        .await
        .unwrap();

        let prompts = generative.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("decision response was not parseable"));
        assert!(prompts[0].contains("The defect table looks fine to me."));
        assert!(prompts[0].contains("no evidence was collected"));
    }
}
