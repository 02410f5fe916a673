use tracing::instrument;

use tripvault_auth::VaultAction;
use tripvault_core::{IntentId, SplitId, TripId, UserId, VaultError, VaultResult};
use tripvault_vault::{
    CasOutcome, ChargeDetails, IntentMetadata, IntentStatus, PaymentIntentHandle, PaymentIntentRecord,
    SettledVia, SettlementRecord, SettlementResult, WebhookEvent, WebhookOutcome, ensure_payable,
};

use super::VaultService;

impl VaultService {
    /// Start a processor payment for the requester's own split.
    ///
    /// The processor call happens with nothing held; the correlation record is
    /// then inserted only if no other intent was recorded in the meantime.
    #[instrument(skip(self), fields(split_id = %split_id, actor = %actor), err)]
    pub async fn create_payment_intent(&self, split_id: SplitId, actor: UserId) -> VaultResult<PaymentIntentHandle> {
        let (entry, split) = self
            .repo
            .get_split(split_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("split {split_id}")))?;

        self.authorize(
            entry.trip_id,
            actor,
            VaultAction::PaySplit {
                split_owner: split.user_id,
            },
        )
        .await?;

        let now = Self::now();
        let latest = self.repo.latest_intent_for_split(split_id).await?;
        ensure_payable(&entry, &split, latest.as_ref(), now, self.settings.intent_ttl)?;

        let amount = entry.split_amount(&split);
        let metadata = IntentMetadata {
            split_id,
            trip_id: entry.trip_id,
            payer_id: split.user_id,
            recipient_id: entry.paid_by,
        };
        let created = self
            .processor
            .create_intent(&amount, &metadata)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "processor refused payment intent"))?;

        let record = PaymentIntentRecord {
            id: created.id.clone(),
            split_id,
            trip_id: entry.trip_id,
            payer_id: split.user_id,
            recipient_id: entry.paid_by,
            amount: amount.clone(),
            status: IntentStatus::Pending,
            failure_message: None,
            created_at: now,
            completed_at: None,
        };
        let observed = latest.as_ref().map(|intent| &intent.id);
        if !self.repo.insert_intent(&record, observed).await? {
            tracing::warn!(intent_id = %created.id, "payment intent lost a race and was discarded");
            return Err(self.explain_lost_race(split_id).await);
        }

        tracing::info!(intent_id = %created.id, amount = %amount, "payment intent created");
        Ok(PaymentIntentHandle {
            intent_id: created.id,
            client_secret: created.client_secret,
            amount,
        })
    }

    /// The error a caller should see after its intent insert was refused.
    async fn explain_lost_race(&self, split_id: SplitId) -> VaultError {
        let current = match self.repo.get_split(split_id).await {
            Ok(Some((entry, split))) => (entry, split),
            Ok(None) => return VaultError::not_found(format!("split {split_id}")),
            Err(err) => return err.into(),
        };
        let latest = match self.repo.latest_intent_for_split(split_id).await {
            Ok(latest) => latest,
            Err(err) => return err.into(),
        };
        match ensure_payable(&current.0, &current.1, latest.as_ref(), Self::now(), self.settings.intent_ttl) {
            Err(err) => err,
            Ok(()) => VaultError::conflict(format!("split {split_id} changed concurrently; retry")),
        }
    }

    /// Reconcile an intent with the processor on the payer's request.
    ///
    /// Idempotent: an intent that already succeeded reports
    /// `newly_applied = false`.
    #[instrument(skip(self), fields(intent_id = %intent_id, actor = %actor), err)]
    pub async fn confirm_payment(&self, intent_id: &IntentId, actor: UserId) -> VaultResult<SettlementResult> {
        let intent = self
            .repo
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("payment intent {intent_id}")))?;

        if intent.payer_id != actor {
            return Err(VaultError::authorization("only the payer may confirm a payment"));
        }

        let result = |status, newly_applied| SettlementResult {
            intent_id: intent.id.clone(),
            split_id: intent.split_id,
            status,
            newly_applied,
        };

        if intent.status != IntentStatus::Pending {
            return Ok(result(intent.status, false));
        }

        let remote = self.processor.retrieve_intent(&intent.id).await?;
        match remote.status {
            IntentStatus::Succeeded => {
                let outcome = self.settle_from_processor(&intent, &remote.charge).await?;
                Ok(result(IntentStatus::Succeeded, outcome == CasOutcome::Applied))
            }
            IntentStatus::Pending => Ok(result(IntentStatus::Pending, false)),
            closed => {
                let status = self.close_intent(&intent, closed, remote.failure_message).await?;
                Ok(result(status, false))
            }
        }
    }

    /// Verify and apply one processor webhook delivery.
    ///
    /// Errors after verification are meant to be reported back to the
    /// processor as failures so it redelivers; every transition is a
    /// compare-and-set, so redelivery is harmless.
    #[instrument(skip(self, raw_body, signature_header))]
    pub async fn handle_webhook(&self, raw_body: &[u8], signature_header: &str) -> VaultResult<WebhookOutcome> {
        let event = self
            .processor
            .verify_webhook(raw_body, signature_header)
            .inspect_err(|err| tracing::warn!(error = %err, "webhook rejected"))?;

        self.apply_webhook_event(event)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "webhook processing failed"))
    }

    async fn apply_webhook_event(&self, event: WebhookEvent) -> VaultResult<WebhookOutcome> {
        match event {
            WebhookEvent::Succeeded {
                intent_id,
                metadata,
                charge,
            } => {
                let intent = self.known_intent(&intent_id).await?;
                if let Some(metadata) = metadata {
                    if metadata.split_id != intent.split_id {
                        return Err(VaultError::validation(format!(
                            "intent {intent_id} metadata names split {} but it was created for {}",
                            metadata.split_id, intent.split_id
                        )));
                    }
                }
                let split_id = intent.split_id;
                match self.settle_from_processor(&intent, &charge).await? {
                    CasOutcome::Applied => Ok(WebhookOutcome::Applied { split_id }),
                    CasOutcome::AlreadyPaid => Ok(WebhookOutcome::AlreadyApplied { split_id }),
                }
            }
            WebhookEvent::Failed { intent_id, message } => {
                let intent = self.known_intent(&intent_id).await?;
                let status = self.close_intent(&intent, IntentStatus::Failed, message).await?;
                Ok(WebhookOutcome::IntentClosed { intent_id, status })
            }
            WebhookEvent::Canceled { intent_id } => {
                let intent = self.known_intent(&intent_id).await?;
                let status = self.close_intent(&intent, IntentStatus::Canceled, None).await?;
                Ok(WebhookOutcome::IntentClosed { intent_id, status })
            }
            WebhookEvent::Other { kind } => {
                tracing::debug!(kind = %kind, "ignoring webhook event");
                Ok(WebhookOutcome::Ignored { kind })
            }
        }
    }

    /// The correlation record may not be persisted yet when the processor is
    /// fast; `NotFound` makes it redeliver.
    async fn known_intent(&self, intent_id: &IntentId) -> VaultResult<PaymentIntentRecord> {
        self.repo
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("payment intent {intent_id}")))
    }

    async fn settle_from_processor(
        &self,
        intent: &PaymentIntentRecord,
        charge: &ChargeDetails,
    ) -> VaultResult<CasOutcome> {
        let (entry, split) = self
            .repo
            .get_split(intent.split_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("split {}", intent.split_id)))?;

        let record = SettlementRecord::for_processor(&entry, &split, intent.id.clone(), charge, Self::now());
        let outcome = self.repo.set_split_paid_if_unpaid(&record).await?;
        match outcome {
            CasOutcome::Applied => tracing::info!(
                split_id = %intent.split_id,
                intent_id = %intent.id,
                amount = %record.amount,
                fee_minor = record.fee_minor.unwrap_or(0),
                "split settled through processor"
            ),
            CasOutcome::AlreadyPaid if split.settled_via == Some(SettledVia::Manual) => tracing::warn!(
                split_id = %intent.split_id,
                intent_id = %intent.id,
                "processor payment succeeded for a split the leader already marked paid"
            ),
            CasOutcome::AlreadyPaid => tracing::debug!(
                split_id = %intent.split_id,
                intent_id = %intent.id,
                "duplicate success for paid split"
            ),
        }
        Ok(outcome)
    }

    /// Move an intent out of `Pending`; returns the status it ends up in.
    async fn close_intent(
        &self,
        intent: &PaymentIntentRecord,
        status: IntentStatus,
        failure_message: Option<String>,
    ) -> VaultResult<IntentStatus> {
        let updated = self
            .repo
            .update_intent_status(&intent.id, status, failure_message, Self::now())
            .await?;
        if updated {
            tracing::info!(split_id = %intent.split_id, intent_id = %intent.id, status = status.as_str(), "payment intent closed");
            return Ok(status);
        }
        let current = self.known_intent(&intent.id).await?;
        Ok(current.status)
    }

    /// Settlement records of a trip, newest first.
    #[instrument(skip(self), fields(trip_id = %trip_id, actor = %actor), err)]
    pub async fn transaction_history(&self, trip_id: TripId, actor: UserId) -> VaultResult<Vec<SettlementRecord>> {
        self.authorize(trip_id, actor, VaultAction::ViewLedger).await?;
        Ok(self.repo.list_settlements(trip_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::PaymentProcessor;
    use crate::repository::VaultRepository;
    use crate::services::fixtures::Fixture;
    use crate::services::{CreateEntryRequest, VaultSettings};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tripvault_vault::{SplitMode, VaultSplit};

    /// Bob pays 60, split equally with Carol; returns Carol's split.
    async fn carol_owes_bob(f: &Fixture) -> VaultSplit {
        let entry = f
            .service
            .create_entry(
                f.bob,
                CreateEntryRequest {
                    trip_id: f.trip,
                    description: "Boat".to_string(),
                    amount: dec!(60),
                    currency: None,
                    category: Some("transport".to_string()),
                    split: SplitMode::Equal {
                        participants: vec![f.bob, f.carol],
                    },
                    paid_by: None,
                    occurred_at: None,
                    processor_payable: true,
                },
            )
            .await
            .unwrap();
        entry.splits.into_iter().find(|s| s.user_id == f.carol).unwrap()
    }

    #[tokio::test]
    async fn only_the_split_owner_may_pay() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;

        let err = f.service.create_payment_intent(split.id, f.alice).await.unwrap_err();
        assert!(matches!(err, VaultError::Authorization(_)));

        let handle = f.service.create_payment_intent(split.id, f.carol).await.unwrap();
        assert_eq!(handle.amount.amount_minor, 3000);
        assert!(!handle.client_secret.is_empty());
    }

    #[tokio::test]
    async fn pending_intent_blocks_until_stale() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;

        let first = f.service.create_payment_intent(split.id, f.carol).await.unwrap();
        let err = f.service.create_payment_intent(split.id, f.carol).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::SettlementInProgress { intent_id, .. } if intent_id == first.intent_id
        ));

        let impatient = f.service_with(VaultSettings {
            intent_ttl: Duration::zero(),
            ..VaultSettings::default()
        });
        let retry = impatient.create_payment_intent(split.id, f.carol).await.unwrap();
        assert_ne!(retry.intent_id, first.intent_id);
    }

    #[tokio::test]
    async fn failed_payment_leaves_split_payable() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;
        let handle = f.service.create_payment_intent(split.id, f.carol).await.unwrap();

        let hook = f.processor.fail(&handle.intent_id, "card declined").unwrap();
        let outcome = f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::IntentClosed {
                intent_id: handle.intent_id.clone(),
                status: IntentStatus::Failed,
            }
        );

        let stored = f.repo.get_intent(&handle.intent_id).await.unwrap().unwrap();
        assert_eq!(stored.failure_message.as_deref(), Some("card declined"));
        assert!(f.service.create_payment_intent(split.id, f.carol).await.is_ok());
    }

    #[tokio::test]
    async fn confirm_applies_processor_success_once() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;
        let handle = f.service.create_payment_intent(split.id, f.carol).await.unwrap();

        let pending = f.service.confirm_payment(&handle.intent_id, f.carol).await.unwrap();
        assert_eq!(pending.status, IntentStatus::Pending);
        assert!(!pending.newly_applied);

        f.processor.succeed(&handle.intent_id).unwrap();
        let err = f.service.confirm_payment(&handle.intent_id, f.bob).await.unwrap_err();
        assert!(matches!(err, VaultError::Authorization(_)));

        let first = f.service.confirm_payment(&handle.intent_id, f.carol).await.unwrap();
        assert!(first.newly_applied);
        assert_eq!(first.status, IntentStatus::Succeeded);
        let second = f.service.confirm_payment(&handle.intent_id, f.carol).await.unwrap();
        assert!(!second.newly_applied);

        let err = f.service.create_payment_intent(split.id, f.carol).await.unwrap_err();
        assert!(matches!(err, VaultError::AlreadySettled(id) if id == split.id));
    }

    #[tokio::test]
    async fn webhook_for_unknown_intent_is_not_found() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;
        let metadata = IntentMetadata {
            split_id: split.id,
            trip_id: f.trip,
            payer_id: f.carol,
            recipient_id: f.bob,
        };
        // Created at the processor but never recorded by the vault.
        let orphan = f
            .processor
            .create_intent(&tripvault_core::Money::new(3000, tripvault_core::Currency::usd()), &metadata)
            .await
            .unwrap();
        let hook = f.processor.succeed(&orphan.id).unwrap();

        let err = f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert_eq!(f.service.unpaid_splits(f.carol, Some(f.trip)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_during_settlement_is_retryable_and_writes_nothing() {
        let (f, faulty) = Fixture::faulty();
        let split = carol_owes_bob(&f).await;
        let handle = f.service.create_payment_intent(split.id, f.carol).await.unwrap();
        let hook = f.processor.succeed(&handle.intent_id).unwrap();

        faulty.fail_settlements(true);
        let err = f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)), "{err:?}");
        assert!(err.is_retryable());

        let (_, stored) = f.repo.get_split(split.id).await.unwrap().unwrap();
        assert!(!stored.paid);
        assert!(f.repo.list_settlements(f.trip).await.unwrap().is_empty());
        assert_eq!(
            f.repo.get_intent(&handle.intent_id).await.unwrap().unwrap().status,
            IntentStatus::Pending
        );

        // The processor redelivers once storage is back.
        faulty.fail_settlements(false);
        let outcome = f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied { split_id: split.id });
    }

    #[tokio::test]
    async fn processor_settlements_record_charge_fee_and_net() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;
        let handle = f.service.create_payment_intent(split.id, f.carol).await.unwrap();

        let hook = f.processor.succeed(&handle.intent_id).unwrap();
        f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap();

        let history = f.service.transaction_history(f.trip, f.bob).await.unwrap();
        assert_eq!(history.len(), 1);
        let record = &history[0];
        assert!(record.charge_id.as_deref().is_some_and(|id| id.starts_with("ch_sim_")));
        assert_eq!(record.fee_minor, Some(117));
        assert_eq!(record.net_minor, Some(3000 - 117));
        assert_eq!(record.amount.amount_minor, 3000);
    }

    #[tokio::test]
    async fn confirmation_takes_charge_details_from_the_processor() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;
        let handle = f.service.create_payment_intent(split.id, f.carol).await.unwrap();
        f.processor.succeed(&handle.intent_id).unwrap();

        assert!(f.service.confirm_payment(&handle.intent_id, f.carol).await.unwrap().newly_applied);
        let remote = f.processor.retrieve_intent(&handle.intent_id).await.unwrap();
        let history = f.service.transaction_history(f.trip, f.carol).await.unwrap();
        assert_eq!(history[0].charge_id, remote.charge.charge_id);
        assert_eq!(history[0].fee_minor, remote.charge.fee_minor);
    }

    #[tokio::test]
    async fn processor_outage_leaves_ledger_untouched() {
        let f = Fixture::new();
        let split = carol_owes_bob(&f).await;
        f.processor.set_unavailable(true);

        let err = f.service.create_payment_intent(split.id, f.carol).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(f.repo.latest_intent_for_split(split.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrelated_events_are_acknowledged() {
        let f = Fixture::new();
        let body = br#"{"id":"evt_1","type":"charge.refunded","data":{"object":{}}}"#.to_vec();
        let hook = f.processor.sign(body).unwrap();
        let outcome = f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                kind: "charge.refunded".to_string()
            }
        );
    }
}
