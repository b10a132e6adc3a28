//! 会话阶段状态机:教学流程的单一事实来源。
//!
//! 状态机只消费离散事件并返回待执行的副作用,不直接触碰音频、
//! 场景或网络,由装配层按序执行副作用。

use std::time::{Duration, Instant};

use nalgebra::Matrix4;
use tracing::debug;

use crate::dialogue::VoiceIntent;
use crate::spatial::AREvent;
use crate::telemetry::events::record_phase_transition;

/// 教学会话的阶段划分。Wrapup 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Onboarding,
    Exploration,
    EncounterPending,
    PraisePath,
    CoachingPath,
    Reflection,
    Wrapup,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Onboarding => "onboarding",
            SessionPhase::Exploration => "exploration",
            SessionPhase::EncounterPending => "encounter_pending",
            SessionPhase::PraisePath => "praise_path",
            SessionPhase::CoachingPath => "coaching_path",
            SessionPhase::Reflection => "reflection",
            SessionPhase::Wrapup => "wrapup",
        }
    }
}

/// 发往语音协调器的抽象台词指令,固定文案见 `session::script`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueCommand {
    CoverStoryIntro,
    ExplorationPrompt,
    Praise,
    CoachDontTouch,
    SafetyAnswer,
    ReflectionPrompt,
}

impl DialogueCommand {
    pub const ALL: [DialogueCommand; 6] = [
        DialogueCommand::CoverStoryIntro,
        DialogueCommand::ExplorationPrompt,
        DialogueCommand::Praise,
        DialogueCommand::CoachDontTouch,
        DialogueCommand::SafetyAnswer,
        DialogueCommand::ReflectionPrompt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueCommand::CoverStoryIntro => "cover_story_intro",
            DialogueCommand::ExplorationPrompt => "exploration_prompt",
            DialogueCommand::Praise => "praise",
            DialogueCommand::CoachDontTouch => "coach_dont_touch",
            DialogueCommand::SafetyAnswer => "safety_answer",
            DialogueCommand::ReflectionPrompt => "reflection_prompt",
        }
    }
}

/// 发往场景层的指令。道具的显隐只经由这些指令变更。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneCommand {
    HideObject,
    ShowObject,
    PlaceObject(Matrix4<f32>),
}

/// 延迟触发的阶段定时器种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTimer {
    ExplorationPrompt,
    EnterReflection,
    WrapupAfterReflection,
}

impl PhaseTimer {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseTimer::ExplorationPrompt => "exploration_prompt_timer",
            PhaseTimer::EnterReflection => "enter_reflection_timer",
            PhaseTimer::WrapupAfterReflection => "wrapup_timer",
        }
    }
}

/// 阶段间隔配置。默认值按口播节奏标定,可按需重调。
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PhaseTimings {
    /// 开场白之后到引导探索提示的间隔。
    pub exploration_prompt_delay: Duration,
    /// 进入表扬或劝导路径之后到复盘提问的间隔。
    pub reflection_delay: Duration,
    /// 复盘提问停留时长,到点收尾。
    pub wrapup_delay: Duration,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            exploration_prompt_delay: Duration::from_secs(2),
            reflection_delay: Duration::from_secs(5),
            wrapup_delay: Duration::from_secs(3),
        }
    }
}

/// 状态机对一次输入的外部反应,由装配层按返回顺序执行。
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEffect {
    Speak(DialogueCommand),
    Scene(SceneCommand),
    Schedule { timer: PhaseTimer, delay: Duration },
    CancelTimers,
}

/// 阶段状态机。转换表之外的事件/阶段组合一律空操作。
pub struct PhaseMachine {
    timings: PhaseTimings,
    phase: SessionPhase,
    near_marked_at: Option<Instant>,
}

impl PhaseMachine {
    pub fn new(timings: PhaseTimings) -> Self {
        Self {
            timings,
            phase: SessionPhase::Onboarding,
            near_marked_at: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == SessionPhase::Wrapup
    }

    /// 无论当前处于哪个阶段,都回到开场并立即进入探索。
    ///
    /// 开场白本身由语音层在会话建立时播报,这里只负责阶段推进和
    /// 探索提示的排程。
    pub fn start(&mut self) -> Vec<PhaseEffect> {
        self.near_marked_at = None;
        self.set_phase(SessionPhase::Onboarding, "start_session");
        self.set_phase(SessionPhase::Exploration, "start_session");
        vec![
            PhaseEffect::CancelTimers,
            PhaseEffect::Schedule {
                timer: PhaseTimer::ExplorationPrompt,
                delay: self.timings.exploration_prompt_delay,
            },
        ]
    }

    /// 无条件收尾。重复调用保持终态不变。
    pub fn stop(&mut self) -> Vec<PhaseEffect> {
        self.near_marked_at = None;
        self.set_phase(SessionPhase::Wrapup, "stop_session");
        vec![PhaseEffect::CancelTimers]
    }

    pub fn on_ar_event(&mut self, event: &AREvent) -> Vec<PhaseEffect> {
        match (self.phase, event) {
            (SessionPhase::Exploration, AREvent::ProximityNear { distance_m }) => {
                self.near_marked_at = Some(Instant::now());
                debug!(
                    target: "session_orchestrator",
                    distance_m,
                    "child approached the prop"
                );
                self.set_phase(SessionPhase::EncounterPending, "proximity_near");
                Vec::new()
            }
            (SessionPhase::EncounterPending, AREvent::BacksAway { delta_m }) => {
                if let Some(marked_at) = self.near_marked_at.take() {
                    debug!(
                        target: "session_orchestrator",
                        delta_m,
                        since_near = ?marked_at.elapsed(),
                        "child backed away from the prop"
                    );
                }
                self.set_phase(SessionPhase::PraisePath, "backs_away");
                self.praise_effects()
            }
            (SessionPhase::EncounterPending, AREvent::Reach { joint, .. }) => {
                debug!(
                    target: "session_orchestrator",
                    joint = joint.as_str(),
                    "child reached into the prop"
                );
                self.set_phase(SessionPhase::CoachingPath, "reach");
                vec![
                    PhaseEffect::Scene(SceneCommand::HideObject),
                    PhaseEffect::Speak(DialogueCommand::CoachDontTouch),
                    PhaseEffect::Schedule {
                        timer: PhaseTimer::EnterReflection,
                        delay: self.timings.reflection_delay,
                    },
                ]
            }
            _ => self.ignore("ar_event"),
        }
    }

    pub fn on_intent(&mut self, intent: VoiceIntent) -> Vec<PhaseEffect> {
        match intent {
            VoiceIntent::CalledAdult
                if matches!(
                    self.phase,
                    SessionPhase::Exploration | SessionPhase::EncounterPending
                ) =>
            {
                self.set_phase(SessionPhase::PraisePath, "called_adult");
                self.praise_effects()
            }
            VoiceIntent::AskedWhatIsThat | VoiceIntent::AskedIsThatReal => {
                vec![PhaseEffect::Speak(DialogueCommand::SafetyAnswer)]
            }
            // 泛泛的提问交给远端模型自由作答,阶段流程不插话。
            VoiceIntent::GeneralQuestion => Vec::new(),
            _ => self.ignore("intent"),
        }
    }

    pub fn on_timer(&mut self, timer: PhaseTimer) -> Vec<PhaseEffect> {
        match (self.phase, timer) {
            (SessionPhase::Exploration, PhaseTimer::ExplorationPrompt) => {
                vec![PhaseEffect::Speak(DialogueCommand::ExplorationPrompt)]
            }
            (
                SessionPhase::PraisePath | SessionPhase::CoachingPath,
                PhaseTimer::EnterReflection,
            ) => {
                self.set_phase(SessionPhase::Reflection, "reflection_timer");
                vec![
                    PhaseEffect::Speak(DialogueCommand::ReflectionPrompt),
                    PhaseEffect::Schedule {
                        timer: PhaseTimer::WrapupAfterReflection,
                        delay: self.timings.wrapup_delay,
                    },
                ]
            }
            (SessionPhase::Reflection, PhaseTimer::WrapupAfterReflection) => {
                self.set_phase(SessionPhase::Wrapup, "reflection_elapsed");
                Vec::new()
            }
            _ => self.ignore("timer"),
        }
    }

    fn praise_effects(&self) -> Vec<PhaseEffect> {
        vec![
            PhaseEffect::Speak(DialogueCommand::Praise),
            PhaseEffect::Schedule {
                timer: PhaseTimer::EnterReflection,
                delay: self.timings.reflection_delay,
            },
        ]
    }

    fn ignore(&self, source: &'static str) -> Vec<PhaseEffect> {
        debug!(
            target: "session_orchestrator",
            phase = self.phase.as_str(),
            source,
            "event has no transition in the current phase"
        );
        Vec::new()
    }

    fn set_phase(&mut self, to: SessionPhase, trigger: &'static str) {
        if self.phase == to {
            return;
        }
        let from = self.phase;
        self.phase = to;
        debug!(
            target: "session_orchestrator",
            from = from.as_str(),
            to = to.as_str(),
            trigger,
            "phase transition"
        );
        record_phase_transition(from.as_str(), to.as_str(), trigger);
    }
}
