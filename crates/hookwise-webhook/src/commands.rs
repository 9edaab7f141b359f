//! Slash commands embedded in comment bodies
//!
//! A line is a command when, after leading whitespace, it starts with `/`
//! and a name made of `[A-Za-z0-9_-]`, optionally followed by whitespace and
//! an argument string. Anything else is ignored.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::events::{DispatchReport, EventContext, EventHandler, HandlerError};

static COMMAND_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([A-Za-z0-9_-]+)(?:\s+(.*))?$").expect("slash command pattern is valid")
});

/// One command found in a comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlashCommand {
    pub name: String,
    /// Trimmed remainder of the line; empty when absent
    pub arguments: String,
    /// Original line text
    pub line: String,
    /// 1-indexed
    pub line_number: usize,
}

/// Extract every command from `body`, in document order
pub fn parse_slash_commands(body: &str) -> Vec<SlashCommand> {
    body.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let captures = COMMAND_LINE.captures(line.trim_start())?;
            let name = captures.get(1)?.as_str().to_string();
            let arguments = captures
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();

            Some(SlashCommand {
                name,
                arguments,
                line: line.to_string(),
                line_number: index + 1,
            })
        })
        .collect()
}

/// Handler for one or more command names
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: &SlashCommand, ctx: &EventContext) -> Result<(), HandlerError>;
}

struct CommandRegistration {
    handler_id: String,
    handler: Arc<dyn CommandHandler>,
}

/// Command name to handlers, built once
#[derive(Default)]
pub struct CommandRegistry {
    by_name: HashMap<String, Vec<CommandRegistration>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    /// Handler ids registered for `name`, in registration order
    pub fn handler_ids(&self, name: &str) -> Vec<&str> {
        self.by_name
            .get(name)
            .map(|regs| regs.iter().map(|r| r.handler_id.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[derive(Default)]
pub struct CommandRegistryBuilder {
    registry: CommandRegistry,
}

impl CommandRegistryBuilder {
    /// Register `handler` under every name in `names`. Names are case-sensitive.
    pub fn register(
        mut self,
        names: &[&str],
        handler_id: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        let handler_id = handler_id.into();
        for name in names {
            self.registry
                .by_name
                .entry((*name).to_string())
                .or_default()
                .push(CommandRegistration {
                    handler_id: handler_id.clone(),
                    handler: handler.clone(),
                });
        }
        self
    }

    pub fn build(self) -> CommandRegistry {
        self.registry
    }
}

/// Routes parsed commands to their handlers
#[derive(Clone)]
pub struct CommandRouter {
    registry: Arc<CommandRegistry>,
}

impl CommandRouter {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Parse `body` and run every handler registered for each command.
    ///
    /// Commands are dispatched independently; failures are collected.
    pub async fn dispatch(&self, body: &str, ctx: &EventContext) -> DispatchReport {
        let mut report = DispatchReport::default();

        for command in parse_slash_commands(body) {
            let Some(registrations) = self.registry.by_name.get(&command.name) else {
                debug!(
                    delivery_id = %ctx.delivery.id(),
                    command = %command.name,
                    "Unknown slash command"
                );
                continue;
            };

            for registration in registrations {
                let result = registration.handler.handle(&command, ctx).await;
                if let Err(e) = &result {
                    warn!(
                        delivery_id = %ctx.delivery.id(),
                        command = %command.name,
                        line = command.line_number,
                        handler_id = %registration.handler_id,
                        error = %e,
                        "Slash command handler failed"
                    );
                }
                report.record(&registration.handler_id, result);
            }
        }

        report
    }
}

/// Event handler that treats a comment body as a stream of sub-events.
///
/// Register it for comment events; it reads `comment.body` from the payload.
pub struct SlashCommandDispatcher {
    router: CommandRouter,
}

impl SlashCommandDispatcher {
    pub fn new(router: CommandRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for SlashCommandDispatcher {
    async fn handle(&self, ctx: &EventContext) -> Result<(), HandlerError> {
        let Some(body) = ctx
            .payload
            .get("comment")
            .and_then(|c| c.get("body"))
            .and_then(|b| b.as_str())
        else {
            return Ok(());
        };

        let report = self.router.dispatch(body, ctx).await;
        if report.is_success() {
            Ok(())
        } else {
            Err(HandlerError::Failed(report.failure_summary()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwise_core::{DeliveryId, WebhookDelivery};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        async fn handle(&self, command: &SlashCommand, _ctx: &EventContext) -> Result<(), HandlerError> {
            self.seen
                .lock()
                .push((command.name.clone(), command.arguments.clone()));
            if self.fail {
                Err(HandlerError::Failed("nope".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn context(body: &str) -> EventContext {
        let payload = serde_json::json!({ "action": "created", "comment": { "body": body } });
        let delivery = WebhookDelivery::new(
            DeliveryId::new("d-1"),
            "issue_comment",
            serde_json::to_vec(&payload).unwrap(),
        )
        .with_action(Some("created".to_string()));
        EventContext::new(delivery, payload)
    }

    #[test]
    fn test_parse_mixed_body() {
        let commands = parse_slash_commands("/label bug, help\nnot a command\n/assign @alice");

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].name, "label");
        assert_eq!(commands[0].arguments, "bug, help");
        assert_eq!(commands[0].line_number, 1);
        assert_eq!(commands[1].name, "assign");
        assert_eq!(commands[1].arguments, "@alice");
        assert_eq!(commands[1].line_number, 3);
    }

    #[test]
    fn test_parse_edge_cases() {
        let commands = parse_slash_commands("   /retest\n/ spaced\n//double\ntext /inline\n/run-ci_2   now  \n/");

        let names: Vec<_> = commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["retest", "run-ci_2"]);
        assert_eq!(commands[0].arguments, "");
        assert_eq!(commands[0].line, "   /retest");
        assert_eq!(commands[1].arguments, "now");
        assert_eq!(commands[1].line_number, 5);
    }

    #[test]
    fn test_parse_rejects_name_with_trailing_punctuation() {
        assert!(parse_slash_commands("/label!").is_empty());
        assert!(parse_slash_commands("").is_empty());
    }

    #[test]
    fn test_parse_handles_crlf() {
        let commands = parse_slash_commands("/approve\r\n/hold reason\r\n");

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].arguments, "reason");
    }

    #[tokio::test]
    async fn test_router_dispatches_each_command() {
        let labels = Arc::new(Recorder::default());
        let shared = Arc::new(Recorder::default());
        let registry = CommandRegistry::builder()
            .register(&["label"], "labels", labels.clone())
            .register(&["assign", "label"], "shared", shared.clone())
            .build();
        let router = CommandRouter::new(Arc::new(registry));

        let body = "/label bug\n/unknown\n/assign @alice";
        let report = router.dispatch(body, &context(body)).await;

        assert!(report.is_success());
        assert_eq!(report.invoked, vec!["labels", "shared", "shared"]);
        assert_eq!(labels.seen.lock().len(), 1);
        assert_eq!(
            *shared.seen.lock(),
            vec![
                ("label".to_string(), "bug".to_string()),
                ("assign".to_string(), "@alice".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_command_names_are_case_sensitive() {
        let handler = Arc::new(Recorder::default());
        let registry = CommandRegistry::builder()
            .register(&["label"], "labels", handler.clone())
            .build();
        let router = CommandRouter::new(Arc::new(registry));

        let report = router.dispatch("/Label bug", &context("/Label bug")).await;

        assert!(report.invoked.is_empty());
        assert!(handler.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_reports_failures() {
        let failing = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let registry = CommandRegistry::builder()
            .register(&["deploy"], "deployer", failing)
            .build();
        let dispatcher = SlashCommandDispatcher::new(CommandRouter::new(Arc::new(registry)));

        let err = dispatcher.handle(&context("/deploy prod")).await.unwrap_err();
        assert!(err.to_string().contains("deployer"));
    }

    #[tokio::test]
    async fn test_dispatcher_ignores_payload_without_comment() {
        let dispatcher = SlashCommandDispatcher::new(CommandRouter::new(Arc::new(
            CommandRegistry::builder().build(),
        )));
        let delivery = WebhookDelivery::new(DeliveryId::new("d-2"), "push", b"{}".to_vec());

        let result = dispatcher
            .handle(&EventContext::new(delivery, serde_json::json!({})))
            .await;
        assert!(result.is_ok());
    }
}
