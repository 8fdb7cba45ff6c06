use crate::risk::TieBreakPolicy;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub ollama_base_url: String,
    pub stt_base_url: String,
    pub stt_api_key: String,
    pub tts_base_url: String,
    pub tts_api_key: String,
    pub tts_voice_id: String,
    pub turn_limit: u32,
    pub tie_break: TieBreakPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set (copy .env.example to .env)"))?;

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let turn_limit = std::env::var("TURN_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7);
        if turn_limit < 2 {
            anyhow::bail!("TURN_LIMIT must be at least 2 (greeting plus farewell)");
        }

        let tie_break = match std::env::var("RISK_TIE_BREAK").as_deref() {
            Ok("caution") => TieBreakPolicy::AlwaysCaution,
            Ok("priority") | Err(_) => TieBreakPolicy::ModalityPriority,
            Ok(other) => anyhow::bail!("Unknown RISK_TIE_BREAK policy: {other}"),
        };

        Ok(Self {
            database_url,
            port,
            ollama_base_url: std::env::var("OLLAMA_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            stt_base_url: std::env::var("STT_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            stt_api_key: std::env::var("STT_API_KEY").unwrap_or_default(),
            tts_base_url: std::env::var("TTS_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.elevenlabs.io/v1".to_string()),
            tts_api_key: std::env::var("TTS_API_KEY").unwrap_or_default(),
            tts_voice_id: std::env::var("TTS_VOICE_ID")
                .unwrap_or_else(|_| "YBRudLRm83BV5Mazcr42".to_string()),
            turn_limit,
            tie_break,
        })
    }
}
