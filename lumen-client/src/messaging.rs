//! Messaging endpoints backing the emulated push channel

use crate::CoordinatorClient;
use crate::error::{ClientError, Result};
use lumen_core::domain::message::Message;
use lumen_core::dto::messaging::{
    HandshakeRequest, HandshakeResponse, PollResponse, SendRequest, SendResponse,
};

impl CoordinatorClient {
    // =============================================================================
    // Messaging
    // =============================================================================

    /// Open a logical connection and obtain a client id
    pub async fn handshake(&self, req: &HandshakeRequest) -> Result<HandshakeResponse> {
        let url = self.url("/ws/handshake");
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Fetch the messages queued for this client
    ///
    /// # Arguments
    /// * `client_id` - The id assigned by the handshake
    pub async fn poll_messages(&self, client_id: &str) -> Result<PollResponse> {
        if client_id.is_empty() {
            return Err(ClientError::InvalidRequest(
                "client_id cannot be empty".to_string(),
            ));
        }

        let url = self.url("/ws/poll");
        let response = self
            .client
            .get(&url)
            .query(&[("client_id", client_id)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Deliver one message on behalf of this client
    pub async fn send_message(&self, client_id: &str, message: &Message) -> Result<SendResponse> {
        let url = self.url("/ws/send");
        let response = self
            .client
            .post(&url)
            .json(&SendRequest {
                client_id: client_id.to_string(),
                message: message.clone(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
