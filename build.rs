use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    gui: Gui,
    live: Live,
    audio: Audio,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Gui {
    local_port: u16,
    remote_port: u16,
    local_ip: String,
    remote_ip: String,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Live {
    ws_url: String,
    model: String,
    voice: String,
    api_key: String,
    output_sample_rate: u32,
    output_channels: u16,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    capture_frame_ms: u32,
    playback_device: String,
    playback_sample_rate: u32,
    playback_channels: u32,
    playback_period_size: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");
    println!("cargo:rerun-if-changed=prompts");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);
    println!("cargo:rustc-env=GUI_LOCAL_IP={}", config.gui.local_ip);
    println!("cargo:rustc-env=GUI_REMOTE_IP={}", config.gui.remote_ip);
    println!("cargo:rustc-env=GUI_BUFFER_SIZE={}", config.gui.buffer_size);

    // Live 会话配置
    println!("cargo:rustc-env=LIVE_WS_URL={}", config.live.ws_url);
    println!("cargo:rustc-env=LIVE_MODEL={}", config.live.model);
    println!("cargo:rustc-env=LIVE_VOICE={}", config.live.voice);
    println!("cargo:rustc-env=LIVE_API_KEY_DEFAULT={}", config.live.api_key);
    println!("cargo:rustc-env=LIVE_OUTPUT_SAMPLE_RATE={}", config.live.output_sample_rate);
    println!("cargo:rustc-env=LIVE_OUTPUT_CHANNELS={}", config.live.output_channels);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_CAPTURE_FRAME_MS={}", config.audio.capture_frame_ms);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_SAMPLE_RATE={}", config.audio.playback_sample_rate);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_CHANNELS={}", config.audio.playback_channels);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);
}
