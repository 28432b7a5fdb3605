#[cfg(test)]
mod tests {
    use crate::cli::Args;
    use crate::config::LLMProvider;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_args_default_values() {
        let args = Args::try_parse_from(&["fabscope-rs"]).unwrap();

        assert!(args.query.is_none());
        assert!(!args.interactive);
        assert_eq!(args.db_path, PathBuf::from("./fab_demo.sqlite"));
        assert_eq!(args.docs_path, PathBuf::from("./manuals"));
        assert!(!args.seed_demo);
        assert!(!args.ingest_manuals);
        assert!(!args.verbose);
        assert!(!args.no_cache);
    }

    #[test]
    fn test_args_short_options() {
        let args = Args::try_parse_from(&[
            "fabscope-rs",
            "-q", "Is 8950XR-P2 healthy?",
            "-d", "/test/fab.sqlite",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.query, Some("Is 8950XR-P2 healthy?".to_string()));
        assert_eq!(args.db_path, PathBuf::from("/test/fab.sqlite"));
        assert!(args.verbose);
    }

    #[test]
    fn test_args_long_options() {
        let args = Args::try_parse_from(&[
            "fabscope-rs",
            "--db-path", "/test/fab.sqlite",
            "--docs-path", "/test/manuals",
            "--seed-demo",
            "--ingest-manuals",
            "--verbose",
        ])
        .unwrap();

        assert_eq!(args.db_path, PathBuf::from("/test/fab.sqlite"));
        assert_eq!(args.docs_path, PathBuf::from("/test/manuals"));
        assert!(args.seed_demo);
        assert!(args.ingest_manuals);
        assert!(args.verbose);
    }

    #[test]
    fn test_args_llm_options() {
        let args = Args::try_parse_from(&[
            "fabscope-rs",
            "--llm-provider", "openai",
            "--llm-api-key", "test-key",
            "--llm-api-base-url", "https://api.openai.com",
            "--model-efficient", "gpt-4o-mini",
            "--model-powerful", "gpt-4o",
            "--max-tokens", "2048",
            "--temperature", "0.7",
        ])
        .unwrap();

        assert_eq!(args.llm_provider, Some("openai".to_string()));
        assert_eq!(args.llm_api_key, Some("test-key".to_string()));
        assert_eq!(
            args.llm_api_base_url,
            Some("https://api.openai.com".to_string())
        );
        assert_eq!(args.model_efficient, Some("gpt-4o-mini".to_string()));
        assert_eq!(args.model_powerful, Some("gpt-4o".to_string()));
        assert_eq!(args.max_tokens, Some(2048));
        assert_eq!(args.temperature, Some(0.7));
    }

    #[test]
    fn test_interactive_mode_decision() {
        // 缺省进入交互模式
        let args = Args::try_parse_from(&["fabscope-rs"]).unwrap();
        assert!(args.interactive_mode());

        // 单次提问走单轮路径
        let args = Args::try_parse_from(&["fabscope-rs", "-q", "Is P1 healthy?"]).unwrap();
        assert!(!args.interactive_mode());

        // 显式--interactive压过单次提问
        let args =
            Args::try_parse_from(&["fabscope-rs", "-q", "Is P1 healthy?", "--interactive"])
                .unwrap();
        assert!(args.interactive_mode());
    }

    #[test]
    fn test_into_config_basic() {
        let args = Args::try_parse_from(&[
            "fabscope-rs",
            "-d", "/test/fab.sqlite",
            "--docs-path", "/test/manuals",
        ])
        .unwrap();

        let config = args.into_config();

        assert_eq!(config.db_path, PathBuf::from("/test/fab.sqlite"));
        assert_eq!(config.docs_path, PathBuf::from("/test/manuals"));
        assert_eq!(config.max_sql_rows, 1000);
        assert!(!config.verbose);
    }

    #[test]
    fn test_into_config_with_overrides() {
        let args = Args::try_parse_from(&[
            "fabscope-rs",
            "--llm-provider", "anthropic",
            "--model-efficient", "claude-haiku",
            "--max-sql-rows", "250",
            "--doc-top-k", "8",
            "--no-cache",
            "--verbose",
        ])
        .unwrap();

        let config = args.into_config();

        assert_eq!(config.llm.provider, LLMProvider::Anthropic);
        assert_eq!(config.llm.model_efficient, "claude-haiku");
        // 未显式指定powerful模型时，回退为efficient模型
        assert_eq!(config.llm.model_powerful, "claude-haiku");
        assert_eq!(config.max_sql_rows, 250);
        assert_eq!(config.doc_top_k, 8);
        assert!(!config.cache.enabled);
        assert!(config.verbose);
    }

    #[test]
    fn test_into_config_unknown_provider_falls_back() {
        let args = Args::try_parse_from(&["fabscope-rs", "--llm-provider", "notaprovider"])
            .unwrap();

        let config = args.into_config();

        assert_eq!(config.llm.provider, LLMProvider::OpenAI);
    }
}
