mod common;

use std::sync::Arc;
use std::time::Duration;

use adearn::catalog::{NewAd, NewTask};
use adearn::client::{AdminApi, RewardApi};
use adearn::error::{Error, ValidationError};
use adearn::model::{AdOption, CompletionStatus, TransactionType, WithdrawalMethod, WithdrawalStatus};
use adearn::session::{AdViewSession, SessionState};
use rust_decimal_macros::dec;

use common::Server;

const DWELL: Duration = Duration::from_millis(300);

async fn ad(admin: &impl AdminApi, title: &str) -> String {
    admin
        .create_ad(&NewAd {
            title: title.into(),
            earning_per_view: Some(dec!(0.01)),
            kind: AdOption::Option1,
            is_active: Some(true),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_viewing_an_ad_after_dwell_credits_once() {
    let server = Server::start().await;
    let admin = server.admin().await;
    ad(&admin, "Spring sale").await;
    ad(&admin, "Summer sale").await;

    let (client, user_id) = server.user("1001").await;
    let user = client.fetch_user(&user_id).await.unwrap().user;
    assert_eq!(user.balance, dec!(0));
    assert_eq!((user.daily_ads_watched, user.daily_ads_limit), (0, 50));

    let mut session = AdViewSession::new(Arc::new(client.clone()), user_id.clone(), DWELL);
    assert_eq!(session.load().await.unwrap(), &SessionState::Gating);
    assert!(matches!(
        session.credit().await,
        Err(Error::Validation(ValidationError::DwellNotElapsed { .. }))
    ));

    let first_ad = session.current_ad().unwrap().id.clone();
    session.wait_ready().await;
    let receipt = session.credit().await.unwrap();
    assert!(!receipt.duplicate);
    assert_eq!(receipt.new_balance, dec!(0.01));
    assert_eq!(session.state(), &SessionState::Gating);

    let user = client.fetch_user(&user_id).await.unwrap().user;
    assert_eq!(user.balance, dec!(0.01));
    assert_eq!(user.daily_ads_watched, 1);

    // Replaying the same view changes nothing.
    let replay = client.view_ad(&user_id, &first_ad, &receipt.view_id).await.unwrap();
    assert!(replay.duplicate);
    assert_eq!(replay.new_balance, dec!(0.01));
    assert_eq!(client.ad_history(&user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_withdrawal_debits_on_approval_only() {
    let server = Server::start().await;
    let admin = server.admin().await;
    let (client, user_id) = server.user("1002").await;
    server.state.ledger.adjust(&user_id, dec!(20), "Opening balance").await.unwrap();

    let user = client.fetch_user(&user_id).await.unwrap();
    let settings = client.fetch_settings().await.unwrap();
    assert_eq!(settings.min_withdrawal, dec!(10));

    let created = client
        .request_withdrawal(&user, &settings, dec!(15), WithdrawalMethod::Bkash, "01700000000")
        .await
        .unwrap();
    assert!(created.success);

    let pending = client.withdrawals(&user_id).await.unwrap();
    assert_eq!(pending[0].status, WithdrawalStatus::Pending);
    assert_eq!(client.fetch_user(&user_id).await.unwrap().user.balance, dec!(20));

    let approved = admin.approve_withdrawal(&created.withdrawal_id).await.unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    admin.approve_withdrawal(&created.withdrawal_id).await.unwrap();
    assert_eq!(client.fetch_user(&user_id).await.unwrap().user.balance, dec!(5));

    let debits = server
        .state
        .ledger
        .history(&user_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionType::WithdrawalApproved)
        .count();
    assert_eq!(debits, 1);
}

#[tokio::test]
async fn test_full_quota_is_refused_without_ledger_entry() {
    let server = Server::start().await;
    let admin = server.admin().await;
    let ad_id = ad(&admin, "Daily deal").await;
    let (client, user_id) = server.user("1003").await;

    for _ in 0..50 {
        server.state.rewards.credit(&user_id, &ad_id, None).await.unwrap();
    }
    let user = client.fetch_user(&user_id).await.unwrap().user;
    assert_eq!((user.daily_ads_watched, user.daily_ads_limit), (50, 50));
    let entries = server.state.ledger.history(&user_id).await.unwrap().len();

    let mut session = AdViewSession::new(Arc::new(client.clone()), user_id.clone(), DWELL);
    assert_eq!(session.load().await.unwrap(), &SessionState::LimitReached);

    let err = client.view_ad(&user_id, &ad_id, "one-more").await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(err.user_message().starts_with("daily limit of 50 ads reached"));

    assert_eq!(server.state.ledger.history(&user_id).await.unwrap().len(), entries);
    assert_eq!(client.fetch_user(&user_id).await.unwrap().user.balance, dec!(0.50));
}

#[tokio::test]
async fn test_task_earning_waits_for_review() {
    let server = Server::start().await;
    let admin = server.admin().await;
    let task = admin
        .create_task(&NewTask {
            title: "Join the channel".into(),
            earning: dec!(2.50),
            ..Default::default()
        })
        .await
        .unwrap();

    let (client, user_id) = server.user("1004").await;
    let submitted = client
        .complete_task(&user_id, &task.id, "https://t.me/c/screenshot")
        .await
        .unwrap();
    assert_eq!(submitted.task_completion.status, CompletionStatus::PendingReview);
    assert_eq!(submitted.new_balance, dec!(0));
    assert!(client.tasks(&user_id).await.unwrap().is_empty());

    let completion_id = submitted.task_completion.id;
    let pending = admin.completions(Some(CompletionStatus::PendingReview)).await.unwrap();
    assert_eq!(pending.len(), 1);

    admin.approve_completion(&completion_id).await.unwrap();
    admin.approve_completion(&completion_id).await.unwrap();
    assert_eq!(client.fetch_user(&user_id).await.unwrap().user.balance, dec!(2.50));

    let history = client.task_history(&user_id).await.unwrap();
    assert_eq!(history[0].status, CompletionStatus::Approved);
}

#[tokio::test]
async fn test_user_token_is_refused_by_admin_routes() {
    let server = Server::start().await;
    let (client, _) = server.user("1005").await;
    let token = client.credentials().await.unwrap().token;

    // Claiming admin rights locally does not fool the server.
    client
        .set_credentials(Some(adearn::client::Credentials { token, is_admin: true }))
        .await;
    match client.users().await {
        Err(Error::Collaborator { status, .. }) => assert_eq!(status, 403),
        other => panic!("expected a refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_quota_used_elsewhere_stops_session() {
    let server = Server::start().await;
    let admin = server.admin().await;
    let ad_id = ad(&admin, "Flash sale").await;
    ad(&admin, "Night sale").await;
    let (client, user_id) = server.user("1006").await;

    let mut session = AdViewSession::new(Arc::new(client.clone()), user_id.clone(), DWELL);
    assert_eq!(session.load().await.unwrap(), &SessionState::Gating);

    // Another device uses up the day meanwhile.
    for _ in 0..50 {
        server.state.rewards.credit(&user_id, &ad_id, None).await.unwrap();
    }

    session.wait_ready().await;
    assert!(matches!(
        session.credit().await,
        Err(Error::Validation(ValidationError::QuotaExhausted { limit: 50 }))
    ));
    assert_eq!(session.state(), &SessionState::LimitReached);
    assert_eq!(session.balance(), dec!(0));
    assert_eq!(client.ad_history(&user_id).await.unwrap().len(), 50);
}

#[tokio::test]
async fn test_ban_during_session_is_reported() {
    let server = Server::start().await;
    let admin = server.admin().await;
    ad(&admin, "Flash sale").await;
    let (client, user_id) = server.user("1007").await;

    let mut session = AdViewSession::new(Arc::new(client.clone()), user_id.clone(), DWELL);
    assert_eq!(session.load().await.unwrap(), &SessionState::Gating);

    server.state.users.set_banned(&user_id, true).await.unwrap();

    session.wait_ready().await;
    assert!(matches!(session.credit().await, Err(Error::Blocked)));
    assert!(matches!(session.state(), SessionState::Error(_)));
    assert!(server.state.ledger.history(&user_id).await.unwrap().is_empty());
}
