//! Per-connection loop of the analysis server.

use anyhow::Result;
use tokio::net::TcpStream;

use crate::config::Config;
use crate::protocol::{self, ClientMessage, MessageStream, ServerMessage};
use crate::session::AnalysisSession;

async fn handle_message(
    stream: &mut MessageStream,
    session: &mut AnalysisSession,
    msg: ClientMessage,
) -> Result<()> {
    match msg {
        ClientMessage::StartTest { test_type } => {
            let reply = match session.start_test(&test_type) {
                Ok(_) => ServerMessage::TestConfigured {
                    ok: true,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("rejected test configuration: {}", e);
                    ServerMessage::TestConfigured {
                        ok: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            protocol::send_message(stream, &reply).await?;
        }
        ClientMessage::ResetTest => session.reset_test(),
        ClientMessage::EndTest => {
            session.end_test();
        }
        ClientMessage::Frame(input) => {
            let reply = match session.process_frame(&input) {
                Ok(processed) => ServerMessage::FrameResult {
                    frame: processed.result,
                    rom: processed.rom,
                },
                Err(e) => {
                    tracing::warn!("{}", e);
                    ServerMessage::FrameRejected {
                        frame_index: Some(input.frame_index),
                        error: e.to_string(),
                    }
                }
            };
            protocol::send_message(stream, &reply).await?;
        }
    }
    Ok(())
}

/// Serves one client until it disconnects.
///
/// A payload that does not decode is answered with `frame_rejected` and skipped;
/// only transport errors end the connection (and with it the session).
pub async fn handle_client(socket: TcpStream, config: &Config) -> Result<()> {
    let mut session = AnalysisSession::new(config)?;
    let mut stream = protocol::message_stream(socket, config.server.max_message_bytes);
    while let Some(data) = protocol::recv_frame(&mut stream).await? {
        match protocol::decode_message::<ClientMessage>(&data) {
            Ok(msg) => handle_message(&mut stream, &mut session, msg).await?,
            Err(e) => {
                tracing::warn!("{}", e);
                let reply = ServerMessage::FrameRejected {
                    frame_index: e.frame_index,
                    error: e.to_string(),
                };
                protocol::send_message(&mut stream, &reply).await?;
            }
        }
    }
    Ok(())
}
