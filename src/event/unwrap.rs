//! 包装层展开
//!
//! 编辑、阅后即焚、一次性查看、设备转发等包装层会层层嵌套。展开是一个有深度上限的
//! 纯函数：每层用内层内容整体替换外层（外层的附属字段一并丢弃），
//! 到达没有包装的内容或超过深度上限时终止。

use super::content::MessageContent;

/// 最大展开深度
pub const MAX_UNWRAP_DEPTH: usize = 8;

/// 展开结果
#[derive(Debug, Clone, PartialEq)]
pub struct Unwrapped {
    pub content: MessageContent,
    /// 编辑包装层指向的原消息提供方 ID
    pub edit_target: Option<String>,
    /// 编辑时间（毫秒），来自编辑协议消息
    pub edited_at_ms: Option<i64>,
    /// 设备转发包装层上的真实目标会话
    pub device_sent_destination: Option<String>,
    pub depth: usize,
    /// 因超过深度上限而提前终止
    pub truncated: bool,
}

/// `unwrap(content) -> content'`
pub fn unwrap(content: &MessageContent) -> Unwrapped {
    unwrap_at(
        content.clone(),
        Unwrapped {
            content: MessageContent::default(),
            edit_target: None,
            edited_at_ms: None,
            device_sent_destination: None,
            depth: 0,
            truncated: false,
        },
    )
}

fn unwrap_at(content: MessageContent, mut acc: Unwrapped) -> Unwrapped {
    let Some(layer) = next_layer(&content) else {
        acc.content = content;
        return acc;
    };
    if acc.depth >= MAX_UNWRAP_DEPTH {
        acc.content = content;
        acc.truncated = true;
        return acc;
    }

    acc.depth += 1;
    match layer {
        Layer::Plain(inner) => unwrap_at(inner, acc),
        Layer::Edit {
            inner,
            target,
            edited_at_ms,
        } => {
            if target.is_some() {
                acc.edit_target = target;
            }
            acc.edited_at_ms = edited_at_ms.or(acc.edited_at_ms);
            unwrap_at(inner, acc)
        }
        Layer::DeviceSent { inner, destination } => {
            acc.device_sent_destination = destination.or(acc.device_sent_destination);
            unwrap_at(inner, acc)
        }
    }
}

enum Layer {
    Plain(MessageContent),
    Edit {
        inner: MessageContent,
        target: Option<String>,
        edited_at_ms: Option<i64>,
    },
    DeviceSent {
        inner: MessageContent,
        destination: Option<String>,
    },
}

fn next_layer(content: &MessageContent) -> Option<Layer> {
    let boxed = |inner: &Option<Box<MessageContent>>| inner.as_deref().cloned();

    if let Some(protocol) = &content.protocol_message {
        let is_edit = protocol.kind.as_ref().is_some_and(|kind| kind.is_edit());
        if is_edit {
            if let Some(inner) = boxed(&protocol.edited_message) {
                let target = protocol.key.as_ref().map(|key| key.id.clone());
                let edited_at_ms = protocol.timestamp_ms.as_ref().and_then(|ts| ts.as_secs());
                return Some(Layer::Edit {
                    inner,
                    target,
                    edited_at_ms,
                });
            }
        }
        return None;
    }

    if let Some(inner) = content.edited_message.as_ref().and_then(|w| boxed(&w.message)) {
        return Some(Layer::Edit {
            inner,
            target: None,
            edited_at_ms: None,
        });
    }

    if let Some(device_sent) = &content.device_sent_message {
        if let Some(inner) = boxed(&device_sent.message) {
            return Some(Layer::DeviceSent {
                inner,
                destination: device_sent.destination_jid.clone(),
            });
        }
    }

    [
        &content.ephemeral_message,
        &content.view_once_message,
        &content.view_once_message_v2,
        &content.view_once_message_v2_extension,
        &content.document_with_caption_message,
    ]
    .into_iter()
    .find_map(|wrapper| wrapper.as_ref().and_then(|w| boxed(&w.message)))
    .map(Layer::Plain)
}
