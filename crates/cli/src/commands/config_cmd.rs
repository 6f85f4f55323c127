//! `amaryllis config`: Configuration management commands.

use amaryllis_config::AppConfig;

/// Non-fatal problems worth pointing out before an engine is started.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if config.engine_config().is_err() {
        warnings.push("No model path set (set [engine] model_path or AMARYLLIS_MODEL_PATH)");
    }

    let vision = config.session.as_ref().is_some_and(|s| s.vision_enabled());
    if vision && config.engine.vision_encoder_path.is_none() {
        warnings.push("Session enables vision but no vision_encoder_path is configured");
    }

    if config.generation_timeout().is_none() {
        warnings.push("No generation timeout; a stalled generation waits forever");
    }

    warnings
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    let policy = &config.context.policy;
    println!();
    println!(
        "   Model:     {}",
        config
            .engine
            .model_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".into())
    );
    println!(
        "   Limits:    top_k<={} tokens<={} images<={}",
        config.engine.max_top_k, config.engine.max_tokens, config.engine.max_num_images
    );
    println!(
        "   Timeout:   {}",
        config
            .generation_timeout()
            .map_or("none".into(), |t| format!("{}s", t.as_secs()))
    );
    println!(
        "   Eviction:  {}",
        policy.eviction_strategy.map(|s| s.as_str()).unwrap_or("lru")
    );
    println!(
        "   Bounds:    items={} bytes={}",
        policy.max_items.map_or("-".into(), |n| n.to_string()),
        policy.max_bytes.map_or("-".into(), |n| n.to_string())
    );

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_path();
    if AppConfig::write_default(&path)? {
        println!("✅ Wrote {}", path.display());
    } else {
        println!("Config already exists at {}", path.display());
    }
    Ok(())
}
