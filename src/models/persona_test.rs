use super::*;

#[test]
fn test_supports_file_patterns() {
    let persona = Persona::new("p", "openai", "gpt-4o").with_media_types(["image/*", "application/pdf"]);
    assert!(persona.supports_file("image/png"));
    assert!(persona.supports_file("IMAGE/JPEG"));
    assert!(persona.supports_file("application/pdf"));
    assert!(!persona.supports_file("application/pdf+x"));
    assert!(!persona.supports_file("text/plain"));
    assert!(!persona.supports_file("imagex/png"));
}

#[test]
fn test_supports_file_wildcards() {
    let any = Persona::new("p", "openai", "m").with_media_types(["*/*"]);
    assert!(any.supports_file("application/octet-stream"));

    let empty_pattern = Persona::new("p", "openai", "m").with_media_types([" "]);
    assert!(empty_pattern.supports_file("video/mp4"));

    let none = Persona::new("p", "deepseek", "m");
    assert!(!none.supports_file("text/plain"));
}

#[test]
fn test_from_params_defaults_by_kind() {
    let params = PersonaParams {
        provider: "deepseek".to_string(),
        model: "deepseek-chat".to_string(),
        max_tokens: 64_000,
        system_prompt: "Be brief.".to_string(),
        ..Default::default()
    };
    let persona =
        Persona::from_params("writer", &params, Some(&BackendKind::DeepSeek)).expect("valid");
    assert!(persona.media_types().is_empty());
    assert!(persona.system_prompt().ends_with("Be brief."));
    assert!(persona.system_prompt().starts_with("Output must follow"));

    let persona =
        Persona::from_params("writer", &params, Some(&BackendKind::OpenAI)).expect("valid");
    assert!(persona.supports_file("image/webp"));

    let params = PersonaParams {
        supported_media_types: Some(vec!["text/*".to_string()]),
        ..params
    };
    let persona =
        Persona::from_params("writer", &params, Some(&BackendKind::OpenAI)).expect("valid");
    assert!(!persona.supports_file("image/webp"));
    assert!(persona.supports_file("text/markdown"));
}

#[test]
fn test_validate_ranges() {
    let params = PersonaParams {
        provider: "openai".to_string(),
        model: "gpt-4o".to_string(),
        max_tokens: 128_000,
        temperature: Some(2.5),
        ..Default::default()
    };
    let err = params.validate("p").unwrap_err();
    assert!(matches!(
        err,
        ValidationError::OutOfRange { field: "temperature", .. }
    ));

    let params = PersonaParams {
        temperature: Some(0.7),
        top_k: Some(0),
        ..params
    };
    let err = params.validate("p").unwrap_err();
    assert!(matches!(err, ValidationError::OutOfRange { field: "top_k", .. }));

    let params = PersonaParams {
        top_k: Some(40),
        max_tokens: 0,
        ..params
    };
    assert!(params.validate("p").is_err());

    let params = PersonaParams {
        max_tokens: 1,
        model: " ".to_string(),
        ..params
    };
    assert_eq!(
        params.validate("p").unwrap_err(),
        ValidationError::EmptyField {
            persona: "p".to_string(),
            field: "model"
        }
    );
}
