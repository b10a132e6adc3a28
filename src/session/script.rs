//! 固定台词库:把抽象台词指令映射为照稿朗读的文字。
//!
//! 这些文案面向学龄前儿童,经过安全教育脚本审订;远端模型收到
//! 后按原文朗读,不做改写。

use super::phase::DialogueCommand;

/// 返回台词指令对应的固定文案。
pub fn utterance_for(command: DialogueCommand) -> &'static str {
    match command {
        DialogueCommand::CoverStoryIntro => {
            "小朋友你好呀,我是安全小卫士。今天我们在房间里玩一个探险游戏,你可以到处走走看看哦。"
        }
        DialogueCommand::ExplorationPrompt => {
            "你可以在房间里慢慢走一走,看看有没有什么东西让你觉得不太安全。"
        }
        DialogueCommand::Praise => {
            "你做得真棒!遇到不认识的东西,先不碰它,去找大人来帮忙,就是最勇敢的做法。"
        }
        DialogueCommand::CoachDontTouch => {
            "哎呀,这个东西看起来有点危险,我们先不碰它。下次看到不认识的东西,记得先叫大人来看看,好吗?"
        }
        DialogueCommand::SafetyAnswer => {
            "这个东西可能有点危险,我们不用手去碰。先叫大人过来看看,让大人告诉你它是什么。"
        }
        DialogueCommand::ReflectionPrompt => {
            "刚才玩得开心吗?如果以后在家里真的见到这样的东西,你会怎么做呀?说给我听听吧。"
        }
    }
}
