//! 事件源
//!
//! 传输层本身不在本 crate 内；这里只定义已解码事件进入核心的端口，
//! 以及供二进制使用的 JSON Lines 实现（每行一个 [`SourceItem`]）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::event::{EventBatch, SessionEvent, TransportEvent};

/// 事件源输出的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub session: String,
    #[serde(flatten)]
    pub action: SourceAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceAction {
    Event(Box<TransportEvent>),
    History(Vec<TransportEvent>),
    /// 队列层重试耗尽的入站解密失败
    DecryptExhausted(Box<TransportEvent>),
    /// 会话登录后报告的账号 JID
    Credentials(String),
}

impl SourceItem {
    /// 事件类条目转为 [`SessionEvent`]，控制类条目原样返回
    pub fn into_session_event(self) -> std::result::Result<SessionEvent, SourceItem> {
        let batch = match self.action {
            SourceAction::Event(event) => EventBatch::Event(event),
            SourceAction::History(events) => EventBatch::History(events),
            action => {
                return Err(SourceItem {
                    session: self.session,
                    action,
                });
            }
        };
        Ok(SessionEvent {
            session: self.session,
            batch,
        })
    }
}

/// 已解码事件的来源
#[async_trait]
pub trait EventSource: Send {
    /// `Ok(None)` 表示事件流结束
    async fn next_item(&mut self) -> Result<Option<SourceItem>>;
}

/// 按行读取 JSON 的事件源
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl JsonLinesSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R> EventSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// 空行跳过；无法解析的行返回 `MalformedContent`，调用方可以继续读取下一行
    async fn next_item(&mut self) -> Result<Option<SourceItem>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                debug!(lines = self.line_no, "event source exhausted");
                return Ok(None);
            };
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line).map(Some).map_err(|err| {
                BridgeError::MalformedContent(format!("line {}: {err}", self.line_no))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = r#"{"session":"5511900000000","event":{"key":{"remoteJid":"5511988887777@s.whatsapp.net","id":"3EB0A"},"message":{"conversation":"oi"}}}

not json
{"session":"5511900000000","credentials":"5511900000000:7@s.whatsapp.net"}
{"session":"5511900000000","history":[]}
"#;

    #[tokio::test]
    async fn reads_items_and_reports_bad_lines() {
        let mut source = JsonLinesSource::new(INPUT.as_bytes());

        let first = source.next_item().await.unwrap().unwrap();
        let event = first.into_session_event().unwrap();
        assert!(matches!(event.batch, EventBatch::Event(ref e) if e.key.id == "3EB0A"));

        let bad = source.next_item().await.unwrap_err();
        assert!(matches!(bad, BridgeError::MalformedContent(ref msg) if msg.starts_with("line 3")));

        let control = source.next_item().await.unwrap().unwrap();
        let control = control.into_session_event().unwrap_err();
        assert_eq!(
            control.action,
            SourceAction::Credentials("5511900000000:7@s.whatsapp.net".into())
        );

        let history = source.next_item().await.unwrap().unwrap();
        assert!(matches!(
            history.into_session_event().unwrap().batch,
            EventBatch::History(ref events) if events.is_empty()
        ));

        assert!(source.next_item().await.unwrap().is_none());
    }
}
