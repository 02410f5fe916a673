//! End-to-end scenarios over the in-memory backend.
//!
//! Entry creation -> allocation -> balances -> payment intent -> signed
//! webhook -> settlement record, including duplicate deliveries and races
//! between the processor and a leader override.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use tripvault_core::{Currency, UserId, VaultError};
    use tripvault_vault::{ShareInput, SplitMode, VaultSplit, WebhookOutcome};

    use crate::repository::VaultRepository;
    use crate::services::CreateEntryRequest;
    use crate::services::fixtures::Fixture;

    fn request(f: &Fixture, amount: Decimal, split: SplitMode) -> CreateEntryRequest {
        CreateEntryRequest {
            trip_id: f.trip,
            description: "Groceries".to_string(),
            amount,
            currency: None,
            category: None,
            split,
            paid_by: None,
            occurred_at: None,
            processor_payable: true,
        }
    }

    fn half_and_half(a: UserId, b: UserId) -> SplitMode {
        SplitMode::Percentage {
            shares: vec![ShareInput::new(a, dec!(50)), ShareInput::new(b, dec!(50))],
        }
    }

    /// Alice pays 60.00 split 50/50 with Bob; returns Bob's split.
    async fn alice_pays_sixty(f: &Fixture) -> VaultSplit {
        let entry = f
            .service
            .create_entry(f.alice, request(f, dec!(60.00), half_and_half(f.alice, f.bob)))
            .await
            .unwrap();
        entry.splits.into_iter().find(|s| s.user_id == f.bob).unwrap()
    }

    fn net(summary: &tripvault_vault::TripSummary, user: UserId) -> i64 {
        summary
            .balances
            .iter()
            .find(|b| b.user_id == user)
            .map(|b| b.balance)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn shared_dinner_balances_and_unpaid_lists() {
        let f = Fixture::new();
        let bob_split = alice_pays_sixty(&f).await;

        let summary = f.service.trip_summary(f.trip, f.bob).await.unwrap();
        assert_eq!(net(&summary, f.alice), 3000);
        assert_eq!(net(&summary, f.bob), -3000);
        assert_eq!(summary.total_expenses, vec![tripvault_core::Money::new(6000, Currency::usd())]);
        assert_eq!(summary.unpaid_splits.len(), 1);
        assert_eq!(summary.unpaid_splits[0].split_id, bob_split.id);
        assert_eq!(summary.unpaid_splits[0].owed_to, f.alice);

        // The payer's own share is never something anyone owes.
        let alice_view = f.service.trip_summary(f.trip, f.alice).await.unwrap();
        assert!(alice_view.unpaid_splits.is_empty());
        assert!(f.service.unpaid_splits(f.alice, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_success_webhook_settles_once() {
        let f = Fixture::new();
        let bob_split = alice_pays_sixty(&f).await;
        let before = f.service.trip_summary(f.trip, f.bob).await.unwrap();

        let handle = f.service.create_payment_intent(bob_split.id, f.bob).await.unwrap();
        assert_eq!(handle.amount.amount_minor, 3000);

        let hook = f.processor.succeed(&handle.intent_id).unwrap();
        let first = f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap();
        let second = f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap();
        assert_eq!(first, WebhookOutcome::Applied { split_id: bob_split.id });
        assert_eq!(second, WebhookOutcome::AlreadyApplied { split_id: bob_split.id });

        let after = f.service.trip_summary(f.trip, f.bob).await.unwrap();
        assert!(after.unpaid_splits.is_empty());
        assert_eq!(after.balances, before.balances);

        let history = f.service.transaction_history(f.trip, f.alice).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].payer_id, f.bob);
        assert_eq!(history[0].recipient_id, f.alice);
        assert_eq!(history[0].method.intent_id(), Some(&handle.intent_id));
    }

    #[tokio::test]
    async fn leader_override_and_webhook_race_converge() {
        let f = Fixture::new();
        let bob_split = alice_pays_sixty(&f).await;
        let handle = f.service.create_payment_intent(bob_split.id, f.bob).await.unwrap();
        let hook = f.processor.succeed(&handle.intent_id).unwrap();

        let (manual, webhook) = tokio::join!(
            f.service.mark_split_paid(bob_split.id, f.alice),
            f.service.handle_webhook(&hook.body, &hook.signature),
        );
        let manual_applied = manual.unwrap();
        let webhook_applied = matches!(webhook.unwrap(), WebhookOutcome::Applied { .. });
        assert!(manual_applied ^ webhook_applied);

        let history = f.service.transaction_history(f.trip, f.bob).await.unwrap();
        assert_eq!(history.len(), 1);
        let (_, split) = f.repo.get_split(bob_split.id).await.unwrap().unwrap();
        assert!(split.paid);
        assert!(split.paid_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_payment_attempts_admit_one_intent() {
        let f = Fixture::new();
        let bob_split = alice_pays_sixty(&f).await;

        let (a, b) = tokio::join!(
            f.service.create_payment_intent(bob_split.id, f.bob),
            f.service.create_payment_intent(bob_split.id, f.bob),
        );
        let results = [a, b];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results.iter().any(|r| matches!(r, Err(VaultError::SettlementInProgress { .. }))));
    }

    #[tokio::test]
    async fn forged_webhook_touches_nothing() {
        let f = Fixture::new();
        let bob_split = alice_pays_sixty(&f).await;
        let handle = f.service.create_payment_intent(bob_split.id, f.bob).await.unwrap();
        let hook = f.processor.succeed(&handle.intent_id).unwrap();

        let forged = hook.signature.replace("v1=", "v1=00");
        let err = f.service.handle_webhook(&hook.body, &forged).await.unwrap_err();
        assert!(matches!(err, VaultError::WebhookVerification(_)));

        let err = f.service.handle_webhook(&hook.body, "").await.unwrap_err();
        assert!(matches!(err, VaultError::WebhookVerification(_)));

        let (_, split) = f.repo.get_split(bob_split.id).await.unwrap().unwrap();
        assert!(!split.paid);
        assert!(f.service.transaction_history(f.trip, f.bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn percentages_must_total_one_hundred() {
        let f = Fixture::new();
        for total in [dec!(99.5), dec!(100.5)] {
            let split = SplitMode::Percentage {
                shares: vec![
                    ShareInput::new(f.alice, dec!(50)),
                    ShareInput::new(f.bob, total - dec!(50)),
                ],
            };
            let err = f
                .service
                .create_entry(f.alice, request(&f, dec!(10), split))
                .await
                .unwrap_err();
            assert!(matches!(err, VaultError::SplitMismatch(_)), "{total}: {err:?}");
        }

        let close_enough = SplitMode::Percentage {
            shares: vec![ShareInput::new(f.alice, dec!(50)), ShareInput::new(f.bob, dec!(49.995))],
        };
        let entry = f
            .service
            .create_entry(f.alice, request(&f, dec!(10), close_enough))
            .await
            .unwrap();
        assert!(entry.is_balanced());
    }

    #[tokio::test]
    async fn balances_conserve_money_per_currency() {
        let f = Fixture::new();
        let users = [f.alice, f.bob, f.carol];
        let yen = Currency::new("JPY").unwrap();

        let dollars = [dec!(10.01), dec!(99.99), dec!(0.05), dec!(1234), dec!(7.77)];
        let yen_amounts = [dec!(11), dec!(100), dec!(1), dec!(1235), dec!(8)];
        for (i, (amount, yen_amount)) in dollars.into_iter().zip(yen_amounts).enumerate() {
            let payer = users[i % users.len()];
            let mut req = request(&f, amount, SplitMode::Equal { participants: vec![] });
            req.paid_by = Some(payer);
            f.service.create_entry(f.alice, req).await.unwrap();

            let mut req = request(&f, yen_amount, SplitMode::Equal { participants: vec![] });
            req.currency = Some(yen.clone());
            f.service.create_entry(payer, req).await.unwrap();
        }

        let summary = f.service.trip_summary(f.trip, f.carol).await.unwrap();
        let mut per_currency: BTreeMap<String, i64> = BTreeMap::new();
        for balance in &summary.balances {
            *per_currency.entry(balance.currency.to_string()).or_default() += balance.balance;
        }
        assert_eq!(per_currency.len(), 2);
        assert!(per_currency.values().all(|sum| *sum == 0), "{per_currency:?}");
        assert_eq!(summary.entry_count, 10);
    }

    #[tokio::test]
    async fn deleting_an_entry_with_a_live_intent_waits() {
        let f = Fixture::new();
        let bob_split = alice_pays_sixty(&f).await;
        let handle = f.service.create_payment_intent(bob_split.id, f.bob).await.unwrap();

        let err = f.service.delete_entry(bob_split.entry_id, f.alice).await.unwrap_err();
        assert!(matches!(err, VaultError::SettlementInProgress { .. }));

        let hook = f.processor.cancel(&handle.intent_id).unwrap();
        f.service.handle_webhook(&hook.body, &hook.signature).await.unwrap();
        f.service.delete_entry(bob_split.entry_id, f.alice).await.unwrap();
        assert!(f.repo.get_intent(&handle.intent_id).await.unwrap().is_none());
    }
}
