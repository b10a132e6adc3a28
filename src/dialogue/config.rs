use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 远端对话模型配置,随配置文件下发。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueModelConfig {
    /// 双工语音模型标识。
    #[serde(default = "default_model")]
    pub model: String,
    /// 合成音色标识。
    #[serde(default = "default_voice")]
    pub voice: String,
    /// 会话语言。
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_model() -> String {
    "duplex-realtime".to_string()
}

fn default_voice() -> String {
    "warm_female".to_string()
}

fn default_locale() -> String {
    "zh-CN".to_string()
}

impl Default for DialogueModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            voice: default_voice(),
            locale: default_locale(),
        }
    }
}

/// 本地语音活动检测参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// 麦克风采样率。
    pub sample_rate_hz: u32,
    /// 判定为语音的响度阈值(dBFS)。
    pub speech_threshold_dbfs: f32,
    /// 响度下限,低于该值按下限上报。
    pub floor_dbfs: f32,
    /// 连续高于阈值多久判定开口。
    pub start_window: Duration,
    /// 连续低于阈值多久判定说完。
    pub end_window: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            speech_threshold_dbfs: -45.0,
            floor_dbfs: -60.0,
            start_window: Duration::from_millis(200),
            end_window: Duration::from_secs(1),
        }
    }
}

/// 会话运行时参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub model: DialogueModelConfig,
    pub vad: VadConfig,
    /// 播放结束后到恢复聆听之间的静默缓冲。
    pub settle_after_playback: Duration,
    /// 轮次发出后等待首个流信号的上限。
    pub turn_open_deadline: Duration,
    pub update_capacity: usize,
    pub frame_capacity: usize,
    pub command_capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            model: DialogueModelConfig::default(),
            vad: VadConfig::default(),
            settle_after_playback: Duration::from_millis(500),
            turn_open_deadline: Duration::from_secs(10),
            update_capacity: 64,
            frame_capacity: 32,
            command_capacity: 16,
        }
    }
}
