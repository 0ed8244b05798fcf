//! Line-oriented front end for a relay host.
//!
//! Each stdin line is one JSON [`RelayInput`]; every event the relay delivers
//! is written to stdout as one JSON [`RelayOutput`] line. Contexts are attached
//! on their first command.
//!
//! ```text
//! {"op":"command","context":{"tab":1},"command":{"type":"init","endpoint":"http://localhost:3000"}}
//! {"op":"command","context":{"tab":1},"command":{"type":"join_room","roomId":"lobby"}}
//! {"op":"removed","context":{"tab":1}}
//! {"op":"status"}
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tabrelay_protocol::{ContextCommand, ContextEvent, ContextId, RoomId};
use tabrelay_runtime::{HostNotification, Identity, RelayConfig, RelayHandle, RelayHost, WebSocketConnector};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::probe::{HEALTH_TIMEOUT, detect_endpoint, health_client};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayInput {
	Command { context: ContextId, command: ContextCommand },
	Removed { context: ContextId },
	Reloading { context: ContextId },
	Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayOutput {
	Event {
		context: ContextId,
		event: ContextEvent,
	},
	Status {
		state: String,
		endpoint: Option<String>,
		current_room: Option<RoomId>,
		contexts: usize,
	},
	Invalid {
		detail: String,
	},
}

pub async fn execute(config: RelayConfig, endpoint: Option<String>) -> anyhow::Result<()> {
	let endpoint = match endpoint.or_else(|| config.endpoint.clone()) {
		Some(endpoint) => endpoint,
		None => {
			let client = health_client(HEALTH_TIMEOUT).context("failed to create HTTP client")?;
			let detected = detect_endpoint(&client, &config.local_url, &config.production_url).await;
			info!(target = "tabrelay", url = %detected.url, local = detected.local, "endpoint detected");
			detected.url
		}
	};

	let identity = Identity::load_or_create(config.identity_path().as_deref());
	info!(target = "tabrelay", user_id = identity.user_id(), display_name = identity.display_name(), %endpoint, "starting relay");
	let (relay, task) = RelayHost::new(identity, config.reconnect, Arc::new(WebSocketConnector))
		.with_endpoint(Some(&endpoint))
		.spawn();

	tokio::select! {
		result = serve(relay.clone(), BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => result?,
		_ = tokio::signal::ctrl_c() => {
			info!(target = "tabrelay", "interrupted");
			relay.shutdown()?;
		}
	}
	task.await.context("relay host panicked")?;
	Ok(())
}

/// Feeds `input` lines to the relay and writes its events to `output` until
/// `input` ends, then shuts the relay down.
pub async fn serve<R, W>(relay: RelayHandle, input: R, output: W) -> anyhow::Result<()>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let (out_tx, out_rx) = mpsc::unbounded_channel();
	let writer = tokio::spawn(write_lines(out_rx, output));

	let mut attached = HashSet::new();
	let mut lines = input.lines();
	while let Some(line) = lines.next_line().await? {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		let input = match serde_json::from_str::<RelayInput>(line) {
			Ok(input) => input,
			Err(err) => {
				let _ = out_tx.send(RelayOutput::Invalid { detail: err.to_string() });
				continue;
			}
		};
		debug!(target = "tabrelay", ?input, "input");

		match input {
			RelayInput::Command { context, command } => {
				if attached.insert(context) {
					forward_events(context, relay.attach(context)?, out_tx.clone());
				}
				relay.command(context, command)?;
			}
			RelayInput::Removed { context } => {
				attached.remove(&context);
				relay.notify(HostNotification::Removed(context))?;
			}
			RelayInput::Reloading { context } => relay.notify(HostNotification::Reloading(context))?,
			RelayInput::Status => {
				let snapshot = relay.snapshot().await?;
				let _ = out_tx.send(RelayOutput::Status {
					state: snapshot.state.to_string(),
					endpoint: snapshot.endpoint,
					current_room: snapshot.current_room,
					contexts: snapshot.contexts.len(),
				});
			}
		}
	}

	relay.shutdown()?;
	drop(out_tx);
	writer.await.context("output writer panicked")??;
	Ok(())
}

fn forward_events(context: ContextId, mut events: mpsc::UnboundedReceiver<ContextEvent>, out: mpsc::UnboundedSender<RelayOutput>) {
	tokio::spawn(async move {
		while let Some(event) = events.recv().await {
			if out.send(RelayOutput::Event { context, event }).is_err() {
				break;
			}
		}
	});
}

async fn write_lines<W: AsyncWrite + Unpin>(mut lines: mpsc::UnboundedReceiver<RelayOutput>, mut output: W) -> anyhow::Result<()> {
	while let Some(line) = lines.recv().await {
		let mut json = serde_json::to_string(&line)?;
		json.push('\n');
		output.write_all(json.as_bytes()).await?;
		output.flush().await?;
	}
	Ok(())
}
