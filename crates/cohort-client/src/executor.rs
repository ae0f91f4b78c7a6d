use arrow_flight::Action;
use bytes::Bytes;
use futures::TryStreamExt;
use log::{debug, warn};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::transport::FlightTransport;

/// One unit of an action response.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    Json(Value),
    Raw(Bytes),
}

impl ActionOutput {
    pub fn decode(body: Bytes) -> Self {
        match std::str::from_utf8(&body)
            .ok()
            .and_then(|text| serde_json::from_str(text).ok())
        {
            Some(value) => ActionOutput::Json(value),
            None => ActionOutput::Raw(body),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ActionOutput::Json(value) => Some(value),
            ActionOutput::Raw(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ActionOutput::Json(value) => Some(value),
            ActionOutput::Raw(_) => None,
        }
    }
}

/// The body of a generic command.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CommandBody {
    /// Arguments sent as a JSON document.
    Args(Value),
    /// A body the caller has already encoded.
    Bytes(Bytes),
    #[default]
    Empty,
}

impl CommandBody {
    pub fn encode(&self) -> ClientResult<Bytes> {
        match self {
            CommandBody::Args(args) => Ok(Bytes::from(serde_json::to_vec(args)?)),
            CommandBody::Bytes(body) => Ok(body.clone()),
            CommandBody::Empty => Ok(Bytes::new()),
        }
    }
}

impl From<Value> for CommandBody {
    fn from(value: Value) -> Self {
        CommandBody::Args(value)
    }
}

impl From<Bytes> for CommandBody {
    fn from(value: Bytes) -> Self {
        CommandBody::Bytes(value)
    }
}

impl From<Vec<u8>> for CommandBody {
    fn from(value: Vec<u8>) -> Self {
        CommandBody::Bytes(Bytes::from(value))
    }
}

/// Invokes a command and decodes every response unit.
///
/// Transport failures are logged and reported as `Ok(None)`, meaning that no result
/// could be obtained. This is different from `Ok(Some(vec![]))`, where the command
/// succeeded without output. An empty command is rejected before any request is sent.
pub async fn execute(
    transport: &dyn FlightTransport,
    command: &str,
    body: impl Into<Bytes>,
) -> ClientResult<Option<Vec<ActionOutput>>> {
    check_command(command)?;
    match try_execute(transport, command, body).await {
        Ok(outputs) => Ok(Some(outputs)),
        Err(e) => {
            warn!("failed to execute command {command}: {e}");
            Ok(None)
        }
    }
}

/// Invokes a command and decodes every response unit, returning transport failures.
pub async fn try_execute(
    transport: &dyn FlightTransport,
    command: &str,
    body: impl Into<Bytes>,
) -> ClientResult<Vec<ActionOutput>> {
    check_command(command)?;
    let action = Action::new(command, body.into());
    let outputs: Vec<ActionOutput> = transport
        .do_action(action)
        .await?
        .map_ok(ActionOutput::decode)
        .try_collect()
        .await?;
    debug!("command {command} returned {} result(s)", outputs.len());
    Ok(outputs)
}

fn check_command(command: &str) -> ClientResult<()> {
    if command.is_empty() {
        return Err(ClientError::invalid("command must not be empty"));
    }
    Ok(())
}
