use serde::Serialize;

use crate::audio::{CaptureConfig, PlaybackConfig};

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
    pub gui_local_ip: &'static str,
    pub gui_remote_ip: &'static str,
    pub gui_buffer_size: usize,

    // Live 会话配置
    pub ws_url: &'static str,
    pub model: &'static str,
    pub voice: &'static str,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub output_sample_rate: u32,
    pub output_channels: u16,

    // 音频设备配置
    pub capture_device: &'static str,
    pub capture_frame_ms: u32,
    pub playback_device: &'static str,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    pub playback_period_size: usize,

    // 提示词
    pub system_instruction: &'static str,
    pub docs_content: &'static str,
}

/// Runtime override for the baked-in API key.
pub const API_KEY_ENV: &str = "LIVE_API_KEY";

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取，API key 可在运行时通过 LIVE_API_KEY 覆盖
    pub fn new() -> Result<Self, &'static str> {
        let api_key = match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => env!("LIVE_API_KEY_DEFAULT").to_string(),
        };

        Ok(Self {
            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_local_ip: env!("GUI_LOCAL_IP"),
            gui_remote_ip: env!("GUI_REMOTE_IP"),
            gui_buffer_size: env!("GUI_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse GUI_BUFFER_SIZE")?,

            ws_url: env!("LIVE_WS_URL"),
            model: env!("LIVE_MODEL"),
            voice: env!("LIVE_VOICE"),
            api_key,
            output_sample_rate: env!("LIVE_OUTPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse LIVE_OUTPUT_SAMPLE_RATE")?,
            output_channels: env!("LIVE_OUTPUT_CHANNELS").parse()
                .map_err(|_| "Failed to parse LIVE_OUTPUT_CHANNELS")?,

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            capture_frame_ms: env!("AUDIO_CAPTURE_FRAME_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_FRAME_MS")?,
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            playback_sample_rate: env!("AUDIO_PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("AUDIO_PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_CHANNELS")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,

            system_instruction: include_str!("../prompts/system_instruction.txt"),
            docs_content: include_str!("../prompts/docs.txt"),
        })
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            device: self.capture_device.to_string(),
            frame_ms: self.capture_frame_ms,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            device: self.playback_device.to_string(),
            sample_rate: self.playback_sample_rate,
            channels: self.playback_channels,
            period_size: self.playback_period_size,
        }
    }

    pub fn gui_local_addr(&self) -> String {
        format!("{}:{}", self.gui_local_ip, self.gui_local_port)
    }

    pub fn gui_remote_addr(&self) -> String {
        format!("{}:{}", self.gui_remote_ip, self.gui_remote_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_values_parse() {
        let config = Config::new().unwrap();
        assert_eq!(config.output_sample_rate, 24000);
        assert_eq!(config.output_channels, 1);
        assert!(config.capture_frame_ms > 0);
        assert!(!config.system_instruction.is_empty());
        assert_eq!(config.gui_local_addr(), "127.0.0.1:5678");
    }

    #[test]
    fn api_key_is_not_serialized() {
        let mut config = Config::new().unwrap();
        config.api_key = "secret".to_string();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
