use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{EngineError, ErrorBody};
use crate::training::metrics::registry;
use crate::training::types::TelemetryEvent;
use crate::training::TrainingEngine;

/// One request line on the command stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    Open { user_id: String, module_type: String },
    #[serde(rename_all = "camelCase")]
    Ingest {
        session_id: String,
        event: TelemetryEvent,
    },
    #[serde(rename_all = "camelCase")]
    Close { session_id: String },
    #[serde(rename_all = "camelCase")]
    Mastery {
        user_id: String,
        skill_category: String,
    },
    #[serde(rename_all = "camelCase")]
    Gaps { user_id: String },
    Stats,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: bool, result: Value },
    Err { ok: bool, error: ErrorBody },
}

impl Response {
    fn ok(result: Value) -> Self {
        Response::Ok { ok: true, result }
    }

    fn err(error: &EngineError) -> Self {
        Response::Err {
            ok: false,
            error: error.to_body(),
        }
    }
}

pub async fn execute(engine: &TrainingEngine, command: Command) -> Result<Value, EngineError> {
    let value = match command {
        Command::Open {
            user_id,
            module_type,
        } => {
            let session_id = engine.open_session(&user_id, &module_type).await?;
            json!({ "sessionId": session_id })
        }
        Command::Ingest { session_id, event } => {
            let outcome = engine.ingest(&session_id, event).await?;
            to_value(&outcome)?
        }
        Command::Close { session_id } => {
            let report = engine.close_session(&session_id).await?;
            to_value(&report)?
        }
        Command::Mastery {
            user_id,
            skill_category,
        } => to_value(&engine.get_skill_mastery(&user_id, &skill_category)?)?,
        Command::Gaps { user_id } => to_value(&engine.identify_knowledge_gaps(&user_id))?,
        Command::Stats => json!({
            "activeSessions": engine.orchestrator().active_count(),
            "paramsVersion": engine.params().version(),
            "writer": to_value(&engine.writer().stats())?,
            "bus": to_value(&engine.bus().stats().await)?,
            "algorithms": to_value(&registry().snapshot())?,
        }),
    };
    Ok(value)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::StateConsistency(format!("response encoding failed: {e}")))
}

/// Parses and executes one line; every outcome, including a bad line, becomes a response.
pub async fn handle_line(engine: &TrainingEngine, line: &str) -> Response {
    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            return Response::err(&EngineError::MalformedEvent(format!(
                "unreadable command: {e}"
            )))
        }
    };

    match execute(engine, command).await {
        Ok(result) => Response::ok(result),
        Err(e) => {
            debug!(kind = e.kind(), error = %e, "command failed");
            Response::err(&e)
        }
    }
}

/// Serves commands until the reader reaches EOF. Blank lines are skipped.
pub async fn serve<R, W>(engine: &TrainingEngine, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(engine, &line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}
