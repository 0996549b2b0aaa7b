use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_bedrockagentcore::Client;
use aws_sdk_bedrockagentcore::error::DisplayErrorContext;
use aws_sdk_bedrockagentcore::primitives::DateTime as EventTime;
use aws_sdk_bedrockagentcore::types::{Content, Conversational, PayloadType, Role};
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use super::{ConversationMemory, ConversationTurn, MemoryKey, TurnRole};

/// Conversation history stored as AgentCore Memory events.
///
/// Each appended exchange becomes one event with a conversational payload per
/// turn; history is read back by listing the session's events.
pub struct AgentCoreMemory {
    client: Client,
}

impl AgentCoreMemory {
    pub async fn new(region: Option<String>) -> Self {
        let config = crate::aws::sdk_config(region).await;
        Self {
            client: Client::new(&config),
        }
    }
}

fn role_of(role: TurnRole) -> Role {
    match role {
        TurnRole::User => Role::User,
        TurnRole::Assistant => Role::Assistant,
    }
}

fn turn_from(payload: &Conversational, timestamp: DateTime<Utc>) -> Option<ConversationTurn> {
    let role = match payload.role() {
        Role::User => TurnRole::User,
        Role::Assistant => TurnRole::Assistant,
        _ => return None,
    };
    let text = match payload.content()? {
        Content::Text(text) => text.clone(),
        _ => return None,
    };
    Some(ConversationTurn {
        role,
        text,
        timestamp,
    })
}

fn event_time(time: &EventTime) -> DateTime<Utc> {
    time.to_millis()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl ConversationMemory for AgentCoreMemory {
    async fn append(&self, key: &MemoryKey, turns: Vec<ConversationTurn>) -> anyhow::Result<()> {
        let Some(first) = turns.first() else {
            return Ok(());
        };
        let timestamp = EventTime::from_millis(first.timestamp.timestamp_millis());

        let mut request = self
            .client
            .create_event()
            .memory_id(&key.memory_id)
            .actor_id(&key.actor_id)
            .session_id(&key.session_id)
            .event_timestamp(timestamp);
        for turn in turns {
            let payload = Conversational::builder()
                .content(Content::Text(turn.text))
                .role(role_of(turn.role))
                .build()
                .map_err(|err| anyhow!("invalid memory event: {err}"))?;
            request = request.payload(PayloadType::Conversational(payload));
        }

        request
            .send()
            .await
            .map_err(|err| anyhow!("CreateEvent failed: {}", DisplayErrorContext(&err)))?;
        debug!(session_id = %key.session_id, "memory event created");
        Ok(())
    }

    async fn recent(&self, key: &MemoryKey, limit: usize) -> anyhow::Result<Vec<ConversationTurn>> {
        let mut pages = self
            .client
            .list_events()
            .memory_id(&key.memory_id)
            .actor_id(&key.actor_id)
            .session_id(&key.session_id)
            .include_payloads(true)
            .into_paginator()
            .send();

        let mut turns = Vec::new();
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|err| anyhow!("ListEvents failed: {}", DisplayErrorContext(&err)))?;
            for event in page.events() {
                let timestamp = event_time(event.event_timestamp());
                turns.extend(event.payload().iter().filter_map(|payload| match payload {
                    PayloadType::Conversational(conversational) => {
                        turn_from(conversational, timestamp)
                    }
                    _ => None,
                }));
            }
        }

        // Stable sort keeps the turn order inside one event.
        turns.sort_by_key(|turn| turn.timestamp);
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversational_payloads_map_to_turns() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let payload = Conversational::builder()
            .content(Content::Text("hello".into()))
            .role(role_of(TurnRole::User))
            .build()
            .unwrap();

        let turn = turn_from(&payload, at).unwrap();
        assert_eq!(turn.role, TurnRole::User);
        assert_eq!(turn.text, "hello");
        assert_eq!(event_time(&EventTime::from_millis(1_700_000_000_000)), at);

        let tool = Conversational::builder()
            .content(Content::Text("{}".into()))
            .role(Role::Tool)
            .build()
            .unwrap();
        assert!(turn_from(&tool, at).is_none());
    }
}
