mod common;
use _notebase_core::config::{load_config, save_config, EngineConfig};
use common::{setup_operator, VAULT};

#[tokio::test]
async fn test_missing_settings_use_defaults() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = load_config(&op, VAULT).await?;
    assert_eq!(config, EngineConfig::default());
    assert!(!config.live_engine);
    assert_eq!(config.default_limit, 20);
    assert_eq!(config.max_limit, 500);
    assert_eq!(config.max_page, 1_000_000);
    assert_eq!(config.max_warnings, 200);
    Ok(())
}

#[tokio::test]
async fn test_settings_round_trip_and_partial_files() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let config = EngineConfig {
        live_engine: true,
        embedding_provider: Some("local".into()),
        ..EngineConfig::default()
    };
    save_config(&op, VAULT, &config).await?;
    assert_eq!(load_config(&op, VAULT).await?, config);

    op.write(
        &format!("{}/.notebase/settings.json", VAULT),
        br#"{"max_limit": 50}"#.to_vec(),
    )
    .await?;
    let partial = load_config(&op, VAULT).await?;
    assert_eq!(partial.max_limit, 50);
    assert_eq!(partial.default_limit, 20);
    Ok(())
}

#[tokio::test]
async fn test_malformed_settings_are_a_validation_error() -> anyhow::Result<()> {
    let op = setup_operator()?;
    op.write(
        &format!("{}/.notebase/settings.json", VAULT),
        b"{not json".to_vec(),
    )
    .await?;
    let err = load_config(&op, VAULT).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    Ok(())
}
