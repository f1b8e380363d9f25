//! Wire dispatch for [`ReplicaServer`]

use crate::error::Result;
use crate::network::RequestHandler;
use crate::replication::{ErrorCode, Message};

use super::ReplicaServer;

impl ReplicaServer {
    async fn dispatch(&self, message: Message) -> Result<Message> {
        let reply = match message {
            Message::Write { txn_id, seq, content } => {
                self.write(txn_id, seq, content).await;
                Message::Ok
            }
            Message::Read { txn_id, file_name } => {
                Message::Content(self.read(txn_id, &file_name).await?)
            }
            Message::Commit { txn_id, expected_count } => {
                self.commit(txn_id, expected_count).await?;
                Message::Ok
            }
            Message::Abort { txn_id } => {
                self.abort(txn_id).await;
                Message::Ok
            }
            Message::CreateFile { file_name } => {
                self.create_file(&file_name).await?;
                Message::Ok
            }
            Message::AcquireLock { file_name } => {
                self.acquire_lock(&file_name).await?;
                Message::Ok
            }
            Message::ReleaseLock { file_name } => {
                self.release_lock(&file_name).await?;
                Message::Ok
            }
            Message::ApplyWrite { txn_id, file_name, write_set } => {
                self.apply_replicated_write(txn_id, &file_name, &write_set).await?;
                Message::Ok
            }
            Message::IsAlive => Message::Alive(self.is_alive()),
            Message::AssignPrimary { file_name, backups } => {
                self.assign_primary(&file_name, &backups).await?;
                Message::Ok
            }
            other => Message::Error {
                code: ErrorCode::InvalidRequest,
                message: format!("{} is not a request", other.type_name()),
            },
        };
        Ok(reply)
    }
}

#[async_trait::async_trait]
impl RequestHandler for ReplicaServer {
    async fn handle(&self, peer_addr: &str, message: Message) -> Message {
        let request = message.type_name();
        match self.dispatch(message).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("{} from {} failed: {}", request, peer_addr, e);
                Message::from_error(&e)
            }
        }
    }
}
