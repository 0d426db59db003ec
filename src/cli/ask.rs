use anyhow::{Result, anyhow};

use crate::chat::SessionBuilder;
use crate::core::AppConfig;

/// Send a single prompt without streaming and print the reply.
pub async fn run(config: AppConfig, model: Option<String>, prompt: &str) -> Result<()> {
    let mut session = SessionBuilder::from_config(&config)
        .streaming(false)
        .build();
    if let Some(model) = model {
        session.set_model(&model)?;
    }

    let Some(id) = session.submit(prompt)? else {
        return Err(anyhow!("Prompt is empty"));
    };
    session.finish().await?;

    let reply = session
        .transcript()
        .get(id)
        .map(|turn| turn.content.clone())
        .unwrap_or_default();
    println!("{}", reply);

    Ok(())
}
