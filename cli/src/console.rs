// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Terminal transport for human interaction.
//!
//! Requests are printed to stdout as they are dispatched; operators answer by
//! typing one command per line on stdin:
//!
//! ```text
//! approve [REQUEST_ID] [comment]
//! reject  [REQUEST_ID] [reason]
//! answer  [REQUEST_ID] <text>
//! pending | status | pause | resume | cancel | help
//! ```
//!
//! Leaving out the request id falls back to the operator's only pending
//! request.

use async_trait::async_trait;
use colored::Colorize;
use uuid::Uuid;

use cadence_core::domain::human_interaction::{HumanResponse, InteractionKind, RequestId};
use cadence_core::infrastructure::delivery::{DeliveryChannel, DeliveryError, OutboundMessage};

/// Prints each dispatched request with the commands that answer it.
pub struct ConsoleDeliveryChannel;

#[async_trait]
impl DeliveryChannel for ConsoleDeliveryChannel {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let request = &message.request;
        let heading = match request.kind {
            InteractionKind::Approval => "Approval needed",
            InteractionKind::Clarification => "Question",
        };
        println!();
        println!(
            "{} {} (task {}, request {})",
            "?".yellow().bold(),
            heading.yellow().bold(),
            request.task_id,
            request.id.to_string().dimmed()
        );
        for line in request.message.lines() {
            println!("  {}", line);
        }
        if !request.options.is_empty() {
            println!("  Options: {}", request.options.join(", "));
        }
        let hint = match request.kind {
            InteractionKind::Approval => format!("approve {0} [comment] | reject {0} [reason]", request.id),
            InteractionKind::Clarification => format!("answer {} <text>", request.id),
        };
        println!(
            "  {} {} (deadline {})",
            "Reply:".dimmed(),
            hint,
            request.deadline.format("%H:%M:%S")
        );
        Ok(())
    }
}

/// One line typed by the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorInput {
    Respond {
        request_id: Option<RequestId>,
        response: HumanResponse,
    },
    Pending,
    Status,
    Pause,
    Resume,
    Cancel,
    Help,
}

/// Splits a leading request id off `rest`, if there is one.
fn take_request_id(rest: &str) -> (Option<RequestId>, &str) {
    let rest = rest.trim();
    let (first, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match Uuid::parse_str(first) {
        Ok(uuid) => (Some(RequestId(uuid)), tail.trim()),
        Err(_) => (None, rest),
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn parse_operator_input(line: &str, operator: &str) -> Result<OperatorInput, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    let input = match verb.to_lowercase().as_str() {
        "approve" | "a" => {
            let (request_id, comment) = take_request_id(rest);
            OperatorInput::Respond {
                request_id,
                response: HumanResponse::approve(non_empty(comment)).by(operator),
            }
        }
        "reject" | "r" => {
            let (request_id, reason) = take_request_id(rest);
            let reason = non_empty(reason).unwrap_or_else(|| "rejected by operator".to_string());
            OperatorInput::Respond {
                request_id,
                response: HumanResponse::reject(reason).by(operator),
            }
        }
        "answer" => {
            let (request_id, text) = take_request_id(rest);
            let text = non_empty(text).ok_or_else(|| "answer needs some text".to_string())?;
            OperatorInput::Respond {
                request_id,
                response: HumanResponse::answer(text).by(operator),
            }
        }
        "pending" | "ls" => OperatorInput::Pending,
        "status" => OperatorInput::Status,
        "pause" => OperatorInput::Pause,
        "resume" => OperatorInput::Resume,
        "cancel" => OperatorInput::Cancel,
        "help" | "?" => OperatorInput::Help,
        "" => return Err("empty input".to_string()),
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(input)
}

pub const HELP: &str = "\
Commands:
  approve [REQUEST_ID] [comment]   approve a result
  reject  [REQUEST_ID] [reason]    reject a result
  answer  [REQUEST_ID] <text>      answer a question
  pending                          list open requests
  status                           show progress
  pause | resume | cancel          control the execution";
