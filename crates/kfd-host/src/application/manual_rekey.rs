//! ManualRekeyApplication: every operator-facing radio operation.
//!
//! Each public operation follows the same skeleton:
//!
//! ```text
//! begin()  ──►  transfer(KMM) → KMM   (one or more)  ──►  end()
//! ```
//!
//! `begin()` takes the engine's single session slot, sends the key signature
//! and runs the opening handshake, retrying with link recovery in between.
//! [`Session::finish`] always runs the closing handshake, also when the
//! operation failed, before the operation's own error is returned.
//!
//! # Negative acknowledgments
//!
//! Any `NegativeAcknowledgment` received in place of a response becomes
//! [`RekeyError::NegativeAcknowledgment`], whose message carries the status
//! name and reason from the status table.  Per-key failures inside a
//! `RekeyAcknowledgment` are *not* errors: they come back as
//! [`KeyStatus`] entries for the caller to report.

use std::sync::Arc;

use kfd_core::protocol::kmm::{
    CapabilitiesResponse, ChangeRsiCommand, ChangeRsiResponse, InventoryCommand, InventoryResponse,
    KeyInfo, KeyItem, KeysetChangeover, KeysetInfo, KeysetPair, LoadConfigCommand,
    LoadConfigResponse, ModifyKeyCommand,
};
use kfd_core::{
    partition_keys, CmdKeyItem, KeyBatch, KeyStatus, KmmBody, KmmMessage, OperationStatus, Rsi,
    RsiItem,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::session::{RecoveryPolicy, RekeyError, SessionProtocol, TransportRecovery};
use crate::infrastructure::session::describe;

/// Keys requested per `ListActiveKeys` page.
pub const INVENTORY_PAGE_SIZE: u16 = 78;

/// Keyset id addressing the active KEK keyset.
pub const ACTIVE_KEK_KEYSET: u8 = 0xFF;

/// Keyset assumed active when the radio reports none.
const FALLBACK_ACTIVE_KEYSET: u8 = 1;

/// Change sequence sent with `ChangeRsiCommand`.
const CHANGE_RSI_SEQUENCE: u8 = 0x00;

/// The rekey orchestration surface.
///
/// Not reentrant: at most one session is open at a time, and an operation
/// started while another is running fails with [`RekeyError::SessionBusy`].
pub struct ManualRekeyApplication {
    protocol: Arc<dyn SessionProtocol>,
    recovery: Mutex<TransportRecovery>,
    session_slot: Mutex<()>,
}

/// An open session.  Holds the engine's session slot until dropped.
pub struct Session<'a> {
    app: &'a ManualRekeyApplication,
    id: Uuid,
    _slot: MutexGuard<'a, ()>,
}

impl ManualRekeyApplication {
    pub fn new(protocol: Arc<dyn SessionProtocol>, policy: RecoveryPolicy) -> Self {
        Self {
            protocol,
            recovery: Mutex::new(TransportRecovery::new(policy)),
            session_slot: Mutex::new(()),
        }
    }

    // ── Session skeleton ──────────────────────────────────────────────────────

    /// Opens a session, retrying initialization with recovery in between.
    ///
    /// # Errors
    ///
    /// [`RekeyError::SessionBusy`] when a session is already open; otherwise
    /// the error of the last initialization attempt.
    pub async fn begin(&self) -> Result<Session<'_>, RekeyError> {
        let slot = self
            .session_slot
            .try_lock()
            .map_err(|_| RekeyError::SessionBusy)?;
        let id = Uuid::new_v4();
        let mut recovery = self.recovery.lock().await;
        let policy = *recovery.policy();

        self.protocol.clear_transport().await;
        let mut attempt = 1;
        loop {
            match self.open_link().await {
                Ok(()) => {
                    info!(session = %id, attempt, "session started");
                    return Ok(Session {
                        app: self,
                        id,
                        _slot: slot,
                    });
                }
                Err(e) if attempt < policy.init_attempts => {
                    warn!(session = %id, attempt, "session initialization failed: {e}");
                    recovery.force_reset(self.protocol.as_ref()).await;
                    tokio::time::sleep(policy.settle_after(attempt)).await;
                    // Drop acknowledgments to the reset disconnects.
                    self.protocol.clear_transport().await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(session = %id, attempts = attempt, "session initialization failed: {e}");
                    if let Err(disconnect_err) = self.protocol.send_disconnect().await {
                        debug!("final disconnect failed: {disconnect_err}");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn open_link(&self) -> Result<(), RekeyError> {
        self.protocol.send_key_signature().await?;
        self.protocol.init_session().await
    }

    // ── Inventory ─────────────────────────────────────────────────────────────

    /// Lists every key in the radio, following inventory markers across pages.
    pub async fn view_key_info(&self) -> Result<Vec<KeyInfo>, RekeyError> {
        let session = self.begin().await?;
        let result = session.list_active_keys().await;
        session.finish(result).await
    }

    /// Lists the ids of the active keysets.
    pub async fn view_active_keyset_ids(&self) -> Result<Vec<u8>, RekeyError> {
        let session = self.begin().await?;
        let result = session.active_keyset_ids().await;
        session.finish(result).await
    }

    pub async fn view_keyset_tagging_info(&self) -> Result<Vec<KeysetInfo>, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            match session
                .inventory(InventoryCommand::ListKeysetTaggingInfo)
                .await?
            {
                InventoryResponse::ListKeysetTaggingInfo(keysets) => Ok(keysets),
                other => Err(unexpected_inventory("ListKeysetTaggingInfo", &other)),
            }
        }
        .await;
        session.finish(result).await
    }

    pub async fn view_rsi_items(&self) -> Result<Vec<RsiItem>, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            match session.inventory(InventoryCommand::ListRsiItems).await? {
                InventoryResponse::ListRsiItems(items) => Ok(items),
                other => Err(unexpected_inventory("ListRsiItems", &other)),
            }
        }
        .await;
        session.finish(result).await
    }

    pub async fn view_kmf_rsi(&self) -> Result<Rsi, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            match session.inventory(InventoryCommand::ListKmfRsi).await? {
                InventoryResponse::ListKmfRsi(rsi) => Ok(rsi),
                other => Err(unexpected_inventory("ListKmfRsi", &other)),
            }
        }
        .await;
        session.finish(result).await
    }

    pub async fn view_mnp(&self) -> Result<u16, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            match session.inventory(InventoryCommand::ListMnp).await? {
                InventoryResponse::ListMnp(mnp) => Ok(mnp),
                other => Err(unexpected_inventory("ListMnp", &other)),
            }
        }
        .await;
        session.finish(result).await
    }

    pub async fn view_capabilities(&self) -> Result<CapabilitiesResponse, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            match session.transfer(KmmBody::CapabilitiesCommand).await? {
                KmmBody::CapabilitiesResponse(caps) => Ok(caps),
                other => Err(RekeyError::violation("CapabilitiesResponse", describe(&other))),
            }
        }
        .await;
        session.finish(result).await
    }

    // ── Key loading ───────────────────────────────────────────────────────────

    /// Loads one key and returns the radio's status for it.
    pub async fn load_keys_single(&self, key: CmdKeyItem) -> Result<KeyStatus, RekeyError> {
        let statuses = self.load_keys_batch(std::slice::from_ref(&key)).await?;
        statuses
            .into_iter()
            .next()
            .ok_or_else(|| RekeyError::violation("one key status", "none"))
    }

    /// Loads keys, one `ModifyKeyCommand` per partition batch.
    ///
    /// # Errors
    ///
    /// Partitioning errors are raised before any session is opened.  Keys the
    /// radio refuses individually are reported through their status, not as
    /// an error.
    pub async fn load_keys_batch(&self, keys: &[CmdKeyItem]) -> Result<Vec<KeyStatus>, RekeyError> {
        self.modify_keys(keys, false).await
    }

    /// Erases the slots named by `keys`.  Key material is not sent.
    pub async fn erase_keys(&self, keys: &[CmdKeyItem]) -> Result<Vec<KeyStatus>, RekeyError> {
        self.modify_keys(keys, true).await
    }

    async fn modify_keys(&self, keys: &[CmdKeyItem], erase: bool) -> Result<Vec<KeyStatus>, RekeyError> {
        let batches = partition_keys(keys)?;
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.begin().await?;
        let result = session.send_batches(&batches, erase).await;
        session.finish(result).await
    }

    /// Zeroizes every key in the radio.
    pub async fn erase_all_keys(&self) -> Result<(), RekeyError> {
        let session = self.begin().await?;
        let result = async {
            match session.transfer(KmmBody::ZeroizeCommand).await? {
                KmmBody::ZeroizeResponse => Ok(()),
                other => Err(RekeyError::violation("ZeroizeResponse", describe(&other))),
            }
        }
        .await;
        session.finish(result).await
    }

    // ── Keysets and configuration ─────────────────────────────────────────────

    /// Activates `activated`, superseding `superseded`.
    pub async fn activate_keyset(&self, superseded: u8, activated: u8) -> Result<Vec<KeysetPair>, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            let command = KeysetChangeover {
                pairs: vec![KeysetPair {
                    superseded,
                    activated,
                }],
            };
            match session.transfer(KmmBody::ChangeoverCommand(command)).await? {
                KmmBody::ChangeoverResponse(response) => Ok(response.pairs),
                other => Err(RekeyError::violation("ChangeoverResponse", describe(&other))),
            }
        }
        .await;
        session.finish(result).await
    }

    /// Changes the radio's RSI from `old` to `new`.
    pub async fn change_rsi(&self, old: Rsi, new: Rsi, message_number: u16) -> Result<ChangeRsiResponse, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            let command = ChangeRsiCommand {
                change_sequence: CHANGE_RSI_SEQUENCE,
                rsi_old: old,
                rsi_new: new,
                message_number,
            };
            match session.transfer(KmmBody::ChangeRsiCommand(command)).await? {
                KmmBody::ChangeRsiResponse(response) => {
                    check_status("change RSI", response.status)?;
                    Ok(response)
                }
                other => Err(RekeyError::violation("ChangeRsiResponse", describe(&other))),
            }
        }
        .await;
        session.finish(result).await
    }

    /// Sets the KMF RSI and message number period.
    pub async fn load_config(&self, kmf_rsi: Rsi, mnp: u16) -> Result<LoadConfigResponse, RekeyError> {
        let session = self.begin().await?;
        let result = async {
            let command = LoadConfigCommand { kmf_rsi, mnp };
            match session.transfer(KmmBody::LoadConfigCommand(command)).await? {
                KmmBody::LoadConfigResponse(response) => {
                    check_status("load config", response.status)?;
                    Ok(response)
                }
                other => Err(RekeyError::violation("LoadConfigResponse", describe(&other))),
            }
        }
        .await;
        session.finish(result).await
    }

    /// Opens and closes a session without payload.
    pub async fn check_connection(&self) -> Result<(), RekeyError> {
        let _slot = self
            .session_slot
            .try_lock()
            .map_err(|_| RekeyError::SessionBusy)?;
        self.protocol.send_key_signature().await?;
        self.protocol.check_target_connection().await
    }
}

impl Session<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Sends one KMM and returns the reply body.
    ///
    /// # Errors
    ///
    /// A `NegativeAcknowledgment` reply becomes
    /// [`RekeyError::NegativeAcknowledgment`].  A timeout surfaces only after
    /// every transfer attempt timed out.
    pub async fn transfer(&self, body: KmmBody) -> Result<KmmBody, RekeyError> {
        let command = body.name();
        let bytes = KmmMessage::new(body).to_bytes()?;
        debug!(session = %self.id, kmm = command, len = bytes.len(), "KMM sent");

        let reply = self.exchange(command, &bytes).await?;
        let reply = KmmMessage::parse(&reply)?.body;
        debug!(session = %self.id, kmm = reply.name(), "KMM received");

        match reply {
            KmmBody::NegativeAcknowledgment(nak) => {
                let status = nak.operation_status();
                warn!(session = %self.id, command, %status, "negative acknowledgment");
                Err(RekeyError::NegativeAcknowledgment { command, status })
            }
            other => Ok(other),
        }
    }

    /// Sends `bytes` and waits for the reply, retrying timed-out exchanges
    /// after a (throttled) link reset.  Other errors are not retried.
    async fn exchange(&self, command: &'static str, bytes: &[u8]) -> Result<Vec<u8>, RekeyError> {
        let policy = *self.app.recovery.lock().await.policy();
        let attempts = policy.transfer_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.app.protocol.perform_kmm_transfer(bytes).await {
                Ok(reply) => return Ok(reply),
                Err(e @ RekeyError::CommunicationTimeout(_)) if attempt < attempts => {
                    warn!(session = %self.id, command, attempt, "KMM transfer failed: {e}");
                    self.app.recovery.lock().await.reset(self.app.protocol.as_ref()).await;
                    tokio::time::sleep(policy.settle_after(attempt)).await;
                    self.app.protocol.clear_transport().await;
                    attempt += 1;
                }
                Err(e) => {
                    if matches!(e, RekeyError::CommunicationTimeout(_)) {
                        error!(session = %self.id, command, attempts = attempt, "KMM transfer failed: {e}");
                        self.app.protocol.clear_transport().await;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Ends the session, then returns `result`.
    ///
    /// The closing handshake always runs.  Its failure is reported only when
    /// the operation itself succeeded.
    pub async fn finish<T>(self, result: Result<T, RekeyError>) -> Result<T, RekeyError> {
        let ended = self.app.protocol.end_session().await;
        match (result, ended) {
            (Ok(value), Ok(())) => {
                info!(session = %self.id, "session ended");
                Ok(value)
            }
            (Ok(_), Err(end_err)) => {
                warn!(session = %self.id, "session teardown failed: {end_err}");
                Err(end_err)
            }
            (Err(e), ended) => {
                if let Err(end_err) = ended {
                    warn!(session = %self.id, "session teardown after failure also failed: {end_err}");
                }
                Err(e)
            }
        }
    }

    async fn inventory(&self, command: InventoryCommand) -> Result<InventoryResponse, RekeyError> {
        match self.transfer(KmmBody::InventoryCommand(command)).await? {
            KmmBody::InventoryResponse(response) => Ok(response),
            other => Err(RekeyError::violation("InventoryResponse", describe(&other))),
        }
    }

    async fn active_keyset_ids(&self) -> Result<Vec<u8>, RekeyError> {
        match self.inventory(InventoryCommand::ListActiveKsetIds).await? {
            InventoryResponse::ListActiveKsetIds(ids) => Ok(ids),
            other => Err(unexpected_inventory("ListActiveKsetIds", &other)),
        }
    }

    async fn list_active_keys(&self) -> Result<Vec<KeyInfo>, RekeyError> {
        let mut keys = Vec::new();
        let mut marker = 0;
        loop {
            let command = InventoryCommand::ListActiveKeys {
                marker,
                max_keys: INVENTORY_PAGE_SIZE,
            };
            match self.inventory(command).await? {
                InventoryResponse::ListActiveKeys {
                    marker: next,
                    keys: page,
                } => {
                    debug!(session = %self.id, page_len = page.len(), next, "key inventory page");
                    keys.extend(page);
                    if next == 0 {
                        return Ok(keys);
                    }
                    marker = next;
                }
                other => return Err(unexpected_inventory("ListActiveKeys", &other)),
            }
        }
    }

    /// Resolves the keyset a TEK batch on the active keyset is loaded into.
    async fn active_tek_keyset(&self) -> Result<u8, RekeyError> {
        let ids = self.active_keyset_ids().await?;
        match ids.first() {
            Some(&id) => Ok(id),
            None => {
                warn!(
                    session = %self.id,
                    "radio reports no active keyset; using keyset {FALLBACK_ACTIVE_KEYSET}"
                );
                Ok(FALLBACK_ACTIVE_KEYSET)
            }
        }
    }

    async fn send_batches(&self, batches: &[KeyBatch], erase: bool) -> Result<Vec<KeyStatus>, RekeyError> {
        let mut active_tek: Option<u8> = None;
        let mut statuses = Vec::new();

        for batch in batches {
            let keyset_id = match batch.keyset_id {
                Some(explicit) => explicit,
                None if batch.is_kek => ACTIVE_KEK_KEYSET,
                None => match active_tek {
                    Some(id) => id,
                    None => {
                        let id = self.active_tek_keyset().await?;
                        active_tek = Some(id);
                        id
                    }
                },
            };
            let command = ModifyKeyCommand {
                keyset_id,
                algorithm_id: batch.algorithm_id,
                keys: batch.items.iter().map(|item| key_item(item, erase)).collect(),
            };
            debug!(
                session = %self.id,
                keyset_id,
                algorithm_id = batch.algorithm_id,
                count = command.keys.len(),
                erase,
                "modify key batch"
            );

            match self.transfer(KmmBody::ModifyKeyCommand(command)).await? {
                KmmBody::RekeyAcknowledgment(ack) => {
                    for status in &ack.statuses {
                        if !status.is_success() {
                            warn!(
                                session = %self.id,
                                key_id = status.key_id,
                                "key refused: {}",
                                OperationStatus::from_code(status.status)
                            );
                        }
                    }
                    statuses.extend(ack.statuses);
                }
                other => return Err(RekeyError::violation("RekeyAcknowledgment", describe(&other))),
            }
        }
        Ok(statuses)
    }
}

fn key_item(item: &CmdKeyItem, erase: bool) -> KeyItem {
    KeyItem {
        sln: item.sln(),
        key_id: item.key_id(),
        is_kek: item.is_kek(),
        erase,
        key: if erase {
            vec![0; item.key().len()]
        } else {
            item.key().to_vec()
        },
    }
}

fn check_status(operation: &'static str, code: u8) -> Result<(), RekeyError> {
    let status = OperationStatus::from_code(code);
    if status.is_success() {
        Ok(())
    } else {
        Err(RekeyError::OperationFailed { operation, status })
    }
}

fn unexpected_inventory(expected: &str, got: &InventoryResponse) -> RekeyError {
    RekeyError::violation(
        format!("InventoryResponse {expected}"),
        format!("InventoryResponse {}", inventory_name(got)),
    )
}

fn inventory_name(response: &InventoryResponse) -> &'static str {
    match response {
        InventoryResponse::ListActiveKsetIds(_) => "ListActiveKsetIds",
        InventoryResponse::ListActiveKeys { .. } => "ListActiveKeys",
        InventoryResponse::ListRsiItems(_) => "ListRsiItems",
        InventoryResponse::ListMnp(_) => "ListMnp",
        InventoryResponse::ListKmfRsi(_) => "ListKmfRsi",
        InventoryResponse::ListKeysetTaggingInfo(_) => "ListKeysetTaggingInfo",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::MockSessionProtocol;
    use kfd_core::protocol::kmm::{NegativeAcknowledgment, RekeyAcknowledgment};
    use mockall::Sequence;

    fn encode(body: KmmBody) -> Vec<u8> {
        KmmMessage::new(body).to_bytes().unwrap()
    }

    fn happy_open(protocol: &mut MockSessionProtocol) {
        protocol.expect_clear_transport().return_const(());
        protocol.expect_send_key_signature().returning(|| Ok(()));
        protocol.expect_init_session().times(1).returning(|| Ok(()));
    }

    fn app(protocol: MockSessionProtocol) -> ManualRekeyApplication {
        ManualRekeyApplication::new(Arc::new(protocol), RecoveryPolicy::default())
    }

    #[tokio::test]
    async fn test_teardown_runs_when_transfer_fails() {
        // Arrange
        let mut protocol = MockSessionProtocol::new();
        happy_open(&mut protocol);
        protocol
            .expect_perform_kmm_transfer()
            .returning(|_| Err(RekeyError::violation("anything", "garbage")));
        protocol.expect_end_session().times(1).returning(|| Ok(()));

        // Act
        let result = app(protocol).erase_all_keys().await;

        // Assert: the transfer error surfaces, end_session ran exactly once
        assert!(matches!(result, Err(RekeyError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_operation_error_wins_over_teardown_error() {
        let mut protocol = MockSessionProtocol::new();
        happy_open(&mut protocol);
        protocol.expect_perform_kmm_transfer().returning(|_| {
            Ok(encode(KmmBody::NegativeAcknowledgment(NegativeAcknowledgment {
                acked_message_id: 0x21,
                message_number: 0,
                status: 0x01,
            })))
        });
        protocol
            .expect_end_session()
            .times(1)
            .returning(|| Err(RekeyError::violation("EndSessionAck", "nothing")));

        let result = app(protocol).erase_all_keys().await;

        assert!(matches!(result, Err(RekeyError::NegativeAcknowledgment { .. })));
    }

    #[tokio::test]
    async fn test_teardown_failure_surfaces_after_success() {
        let mut protocol = MockSessionProtocol::new();
        happy_open(&mut protocol);
        protocol
            .expect_perform_kmm_transfer()
            .returning(|_| Ok(encode(KmmBody::ZeroizeResponse)));
        protocol
            .expect_end_session()
            .returning(|| Err(RekeyError::violation("EndSessionAck", "nothing")));

        let result = app(protocol).erase_all_keys().await;

        assert!(matches!(result, Err(RekeyError::ProtocolViolation { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_recovers_on_second_attempt() {
        // Arrange
        let mut protocol = MockSessionProtocol::new();
        let mut seq = Sequence::new();
        protocol.expect_clear_transport().return_const(());
        protocol.expect_send_key_signature().returning(|| Ok(()));
        protocol
            .expect_init_session()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(RekeyError::CommunicationTimeout(std::time::Duration::from_secs(1))));
        protocol
            .expect_init_session()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        protocol.expect_send_disconnect().times(2).returning(|| Ok(()));
        protocol
            .expect_perform_kmm_transfer()
            .returning(|_| Ok(encode(KmmBody::ZeroizeResponse)));
        protocol.expect_end_session().returning(|| Ok(()));

        // Act
        let result = app(protocol).erase_all_keys().await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_transfer_is_retried_after_reset() {
        // Arrange: the first exchange times out, the second one answers
        let mut protocol = MockSessionProtocol::new();
        let mut seq = Sequence::new();
        happy_open(&mut protocol);
        protocol
            .expect_perform_kmm_transfer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(RekeyError::CommunicationTimeout(std::time::Duration::from_secs(1))));
        protocol
            .expect_perform_kmm_transfer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(encode(KmmBody::InventoryResponse(InventoryResponse::ListMnp(7)))));
        protocol.expect_send_disconnect().times(2).returning(|| Ok(()));
        protocol.expect_end_session().times(1).returning(|| Ok(()));

        // Act
        let result = app(protocol).view_mnp().await;

        // Assert
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_timeout_surfaces_once_attempts_are_used_up() {
        // Arrange
        let mut protocol = MockSessionProtocol::new();
        happy_open(&mut protocol);
        protocol
            .expect_perform_kmm_transfer()
            .times(3)
            .returning(|_| Err(RekeyError::CommunicationTimeout(std::time::Duration::from_secs(1))));
        // One burst: the second reset falls inside the throttle window.
        protocol.expect_send_disconnect().times(2).returning(|| Ok(()));
        protocol.expect_end_session().times(1).returning(|| Ok(()));

        // Act
        let result = app(protocol).view_mnp().await;

        // Assert
        assert!(matches!(result, Err(RekeyError::CommunicationTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_resets_between_every_attempt_despite_throttle() {
        // Arrange: three failed attempts, settle delays well inside 3 s
        let mut protocol = MockSessionProtocol::new();
        protocol.expect_clear_transport().return_const(());
        protocol.expect_send_key_signature().returning(|| Ok(()));
        protocol
            .expect_init_session()
            .times(3)
            .returning(|| Err(RekeyError::CommunicationTimeout(std::time::Duration::from_secs(1))));
        // Two bursts of two, plus the final best-effort disconnect.
        protocol.expect_send_disconnect().times(5).returning(|| Ok(()));

        // Act
        let result = app(protocol).view_mnp().await;

        // Assert
        assert!(matches!(result, Err(RekeyError::CommunicationTimeout(_))));
    }

    #[tokio::test]
    async fn test_failed_begin_skips_teardown() {
        // Arrange: end_session has no expectation, so calling it would panic
        let mut protocol = MockSessionProtocol::new();
        protocol.expect_clear_transport().return_const(());
        protocol.expect_send_key_signature().returning(|| Ok(()));
        protocol
            .expect_init_session()
            .times(1)
            .returning(|| Err(RekeyError::violation("ReadyGeneralMode", "EndSessionAck")));
        protocol.expect_send_disconnect().returning(|| Ok(()));
        let policy = RecoveryPolicy {
            init_attempts: 1,
            ..RecoveryPolicy::default()
        };
        let app = ManualRekeyApplication::new(Arc::new(protocol), policy);

        // Act
        let result = app.view_mnp().await;

        // Assert
        assert!(matches!(result, Err(RekeyError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_second_session_is_rejected_while_one_is_open() {
        // Arrange
        let mut protocol = MockSessionProtocol::new();
        happy_open(&mut protocol);
        let app = app(protocol);

        // Act
        let first = app.begin().await.unwrap();
        let second = app.view_mnp().await;

        // Assert
        assert!(matches!(second, Err(RekeyError::SessionBusy)));
        drop(first);
    }

    #[tokio::test]
    async fn test_kek_on_active_keyset_uses_sentinel_without_inventory() {
        // Arrange
        let mut protocol = MockSessionProtocol::new();
        happy_open(&mut protocol);
        protocol
            .expect_perform_kmm_transfer()
            .times(1)
            .withf(|kmm| {
                matches!(
                    KmmMessage::parse(kmm).map(|m| m.body),
                    Ok(KmmBody::ModifyKeyCommand(ModifyKeyCommand { keyset_id: 0xFF, .. }))
                )
            })
            .returning(|_| {
                Ok(encode(KmmBody::RekeyAcknowledgment(RekeyAcknowledgment {
                    acked_message_id: 0x13,
                    statuses: vec![KeyStatus {
                        algorithm_id: 0x84,
                        key_id: 7,
                        status: 0,
                    }],
                })))
            });
        protocol.expect_end_session().returning(|| Ok(()));
        let kek = CmdKeyItem::new(true, 1, 0xF001, true, 7, 0x84, vec![0x11; 32]).unwrap();

        // Act
        let status = app(protocol).load_keys_single(kek).await.unwrap();

        // Assert
        assert_eq!(status.key_id, 7);
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_partition_error_is_raised_before_session() {
        // No expectations: any protocol call would panic.
        let protocol = MockSessionProtocol::new();
        let keys = vec![
            CmdKeyItem::new(true, 1, 1, false, 1, 0x84, vec![0; 32]).unwrap(),
            CmdKeyItem::new(true, 1, 2, false, 2, 0x84, vec![0; 16]).unwrap(),
        ];

        let result = app(protocol).load_keys_batch(&keys).await;

        assert!(matches!(result, Err(RekeyError::Partition(_))));
    }

    #[test]
    fn test_erase_item_carries_no_key_material() {
        let key = CmdKeyItem::new(false, 3, 5, false, 9, 0x84, vec![0xAB; 32]).unwrap();

        let item = key_item(&key, true);

        assert!(item.erase);
        assert_eq!(item.key, vec![0; 32]);
    }

    #[test]
    fn test_non_zero_response_status_is_operation_failure() {
        let err = check_status("load config", 0x07).unwrap_err();

        assert!(err.to_string().contains("Invalid Message Number"));
    }
}
