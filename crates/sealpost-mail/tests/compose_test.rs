//! Compose and decrypt through the SecureMail facade, over the in-memory
//! store and a fake PGP engine.

mod helpers;

use chrono::{Duration, Utc};
use helpers::{compose, fake_encrypt, Harness};
use sealpost_core::{BindingRepository, ErrorCode, SecurityMode};
use sealpost_crypto::IntegrityEnvelope;

#[tokio::test]
async fn test_plain_compose_stores_readable_copies() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "hello bob", false, false, ""))
        .await
        .unwrap();
    assert_eq!(sent.message_ids.len(), 2);

    let bob_copy = h.mail.get_message(bob.id, sent.message_ids[0]).await.unwrap();
    assert_eq!(bob_copy.mode, SecurityMode::Plain);
    assert_eq!(bob_copy.body.as_deref(), Some("hello bob"));
    assert_eq!(bob_copy.sender_email, "alice@example.com");
    assert!(!bob_copy.read);

    let own = h.mail.get_message(alice.id, sent.message_ids[1]).await.unwrap();
    assert_eq!(own.mode, SecurityMode::Plain);
    assert_eq!(own.body.as_deref(), Some("hello bob"));
    assert!(own.read);

    assert!(h.store.get_binding(sent.message_ids[0]).await.unwrap().is_none());
    assert_eq!(h.engine.crypto_calls(), 0);

    let opened = h.mail.decrypt(bob.id, sent.message_ids[0], "").await.unwrap();
    assert_eq!(opened.body, "hello bob");
    assert_eq!(opened.verified_by, None);
}

#[tokio::test]
async fn test_encrypted_copy_hides_body_until_decrypted() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let bob_key = h.keygen(&bob, "bob-pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "the numbers", true, false, ""))
        .await
        .unwrap();
    let bob_copy_id = sent.message_ids[0];

    let view = h.mail.get_message(bob.id, bob_copy_id).await.unwrap();
    assert_eq!(view.mode, SecurityMode::Encrypted);
    assert_eq!(view.subject, "Quarterly numbers");
    assert!(view.body.is_none());

    let listed = h.mail.list_messages(bob.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].body.is_none());

    // The sender keeps a plain copy without any binding.
    let own = h.mail.get_message(alice.id, sent.message_ids[1]).await.unwrap();
    assert_eq!(own.mode, SecurityMode::Plain);
    assert_eq!(own.body.as_deref(), Some("the numbers"));

    let binding = h.store.get_binding(bob_copy_id).await.unwrap().unwrap();
    assert_eq!(binding.recipient_key_id.as_deref(), Some(bob_key.key_id.as_str()));
    assert!(binding.sender_key_id.is_none());

    let opened = h.mail.decrypt(bob.id, bob_copy_id, "bob-pw").await.unwrap();
    assert_eq!(opened.body, "the numbers");
    assert_eq!(opened.mode, SecurityMode::Encrypted);
    assert_eq!(opened.sender_email, "alice@example.com");

    // Alice caches Bob's key as a received key.
    let received = h.mail.list_received_keys(alice.id).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].key_id, bob_key.key_id);
}

#[tokio::test]
async fn test_wrong_decrypt_passphrase_fails_before_engine() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    h.keygen(&bob, "bob-pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "secret", true, false, ""))
        .await
        .unwrap();
    let calls = h.engine.crypto_calls();

    let err = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "wrong")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthenticationFailed);
    assert_eq!(h.engine.crypto_calls(), calls);
}

#[tokio::test]
async fn test_other_users_cannot_open_a_copy() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let carol = h.user("carol@example.com");
    h.keygen(&bob, "pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "for bob", true, false, ""))
        .await
        .unwrap();

    let err = h
        .mail
        .decrypt(carol.id, sent.message_ids[0], "pw")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_expired_recipient_key_aborts_without_copies() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let bob_key = h.keygen(&bob, "pw").await;
    assert!(h
        .store
        .set_key_expiry(bob.id, &bob_key.key_id, Utc::now() - Duration::days(1))
        .unwrap());

    let err = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "late", true, false, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyExpired);
    assert_eq!(err.recipient.as_deref(), Some("bob@example.com"));
    assert_eq!(h.store.message_count().unwrap(), 0);
    assert_eq!(h.engine.crypto_calls(), 0);
}

#[tokio::test]
async fn test_expired_sender_key_rejects_signing() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    h.user("bob@example.com");
    let alice_key = h.keygen(&alice, "pw").await;
    h.store
        .set_key_expiry(alice.id, &alice_key.key_id, Utc::now() - Duration::hours(1))
        .unwrap();

    let err = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "signed", false, true, "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyExpired);
    assert_eq!(err.recipient.as_deref(), Some("alice@example.com"));
    assert_eq!(h.store.message_count().unwrap(), 0);
}

#[tokio::test]
async fn test_recipient_errors_name_the_recipient() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    h.user("bob@example.com");

    let err = h
        .mail
        .compose(alice.id, compose(&["nobody@example.com"], "x", false, false, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RecipientNotFound);
    assert_eq!(err.recipient.as_deref(), Some("nobody@example.com"));

    let err = h
        .mail
        .compose(alice.id, compose(&["bob@example.com", "ALICE@example.com"], "x", false, false, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SelfRecipientRejected);

    // Bob has no key to encrypt to.
    let err = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "x", true, false, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyNotFound);
    assert_eq!(err.recipient.as_deref(), Some("bob@example.com"));

    let err = h
        .mail
        .compose(alice.id, compose(&[], "x", false, false, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParameter);

    assert_eq!(h.store.message_count().unwrap(), 0);
}

#[tokio::test]
async fn test_one_failing_recipient_aborts_the_delivery() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    h.user("carol@example.com");
    h.keygen(&bob, "pw").await;

    let err = h
        .mail
        .compose(
            alice.id,
            compose(&["bob@example.com", "carol@example.com"], "x", true, false, ""),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyNotFound);
    assert_eq!(err.recipient.as_deref(), Some("carol@example.com"));
    assert_eq!(h.store.message_count().unwrap(), 0);
    assert!(h.mail.list_received_keys(alice.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_recipients_get_one_copy() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");

    let sent = h
        .mail
        .compose(
            alice.id,
            compose(&["bob@example.com", "BOB@example.com"], "once", false, false, ""),
        )
        .await
        .unwrap();
    assert_eq!(sent.message_ids.len(), 2);
    assert_eq!(h.mail.list_messages(bob.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_wrong_signing_passphrase_fails_before_engine() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    h.keygen(&alice, "alice-pw").await;
    h.keygen(&bob, "bob-pw").await;

    let err = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "x", true, true, "wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthenticationFailed);
    assert_eq!(h.engine.crypto_calls(), 0);
    assert_eq!(h.store.message_count().unwrap(), 0);
}

#[tokio::test]
async fn test_signing_without_default_key_until_one_is_chosen() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    h.user("bob@example.com");
    let first = h.keygen(&alice, "pw").await;
    let second = h.keygen(&alice, "pw").await;
    h.mail.delete_key(alice.id, &first.key_id).await.unwrap();

    let err = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "x", false, true, "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyNotFound);
    assert!(err.recipient.is_none());

    h.mail.set_default_key(alice.id, &second.key_id).await.unwrap();
    h.mail
        .compose(alice.id, compose(&["bob@example.com"], "x", false, true, "pw"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recipient_key_rotation_keeps_old_mail_readable() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let old = h.keygen(&bob, "old-pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "before rotation", true, false, ""))
        .await
        .unwrap();

    let new = h.keygen(&bob, "new-pw").await;
    h.mail.set_default_key(bob.id, &new.key_id).await.unwrap();

    let opened = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "old-pw")
        .await
        .unwrap();
    assert_eq!(opened.body, "before rotation");

    // New mail goes to the new key.
    let later = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "after rotation", true, false, ""))
        .await
        .unwrap();
    let binding = h.store.get_binding(later.message_ids[0]).await.unwrap().unwrap();
    assert_eq!(binding.recipient_key_id.as_deref(), Some(new.key_id.as_str()));
    let opened = h
        .mail
        .decrypt(bob.id, later.message_ids[0], "new-pw")
        .await
        .unwrap();
    assert_eq!(opened.body, "after rotation");

    // Alice now holds snapshots of both keys.
    assert_eq!(h.mail.list_received_keys(alice.id).await.unwrap().len(), 2);
    assert_ne!(old.key_id, new.key_id);
}

#[tokio::test]
async fn test_deleted_recipient_key_makes_mail_unreadable() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let key = h.keygen(&bob, "pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "x", true, false, ""))
        .await
        .unwrap();
    h.mail.delete_key(bob.id, &key.key_id).await.unwrap();

    let err = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "pw")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BindingMissing);
}

#[tokio::test]
async fn test_tampered_body_fails_integrity_check() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let key = h.keygen(&bob, "pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "genuine", true, false, ""))
        .await
        .unwrap();

    let forger = IntegrityEnvelope::new(b"someone-else".to_vec()).unwrap();
    let forged = fake_encrypt(&key.key_id, &forger.wrap("forged").unwrap());
    assert!(h.store.replace_body(sent.message_ids[0], &forged).unwrap());

    let err = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "pw")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::IntegrityCheckFailed);
}

#[tokio::test]
async fn test_missing_binding_is_reported() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    h.keygen(&bob, "pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "x", true, false, ""))
        .await
        .unwrap();
    assert!(h.store.remove_binding(sent.message_ids[0]).unwrap());

    let err = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "pw")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BindingMissing);
}

#[tokio::test]
async fn test_signature_checked_against_bound_sender_key() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let old = h.keygen(&alice, "pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "signed note", false, true, "pw"))
        .await
        .unwrap();
    let bob_copy = h.mail.get_message(bob.id, sent.message_ids[0]).await.unwrap();
    assert_eq!(bob_copy.mode, SecurityMode::Signed);
    assert!(bob_copy.body.is_none());

    // Alice rotates; Bob still verifies against the key that signed.
    let new = h.keygen(&alice, "pw").await;
    h.mail.set_default_key(alice.id, &new.key_id).await.unwrap();

    let opened = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "ignored")
        .await
        .unwrap();
    assert_eq!(opened.body, "signed note");
    assert_eq!(opened.verified_by.as_deref(), Some(old.key_id.as_str()));

    // Without the received key there is nothing to verify against.
    h.mail.delete_received_key(bob.id, &old.key_id).await.unwrap();
    let err = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "ignored")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BindingMissing);
}

#[tokio::test]
async fn test_encrypted_and_signed_round_trip() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    let alice_key = h.keygen(&alice, "alice-pw").await;
    let bob_key = h.keygen(&bob, "bob-pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "both", true, true, "alice-pw"))
        .await
        .unwrap();

    let binding = h.store.get_binding(sent.message_ids[0]).await.unwrap().unwrap();
    assert_eq!(binding.recipient_key_id.as_deref(), Some(bob_key.key_id.as_str()));
    assert_eq!(binding.sender_key_id.as_deref(), Some(alice_key.key_id.as_str()));
    assert!(binding.recipient_snapshot_id.is_some());
    assert!(binding.sender_snapshot_id.is_some());

    let opened = h
        .mail
        .decrypt(bob.id, sent.message_ids[0], "bob-pw")
        .await
        .unwrap();
    assert_eq!(opened.mode, SecurityMode::EncryptedAndSigned);
    assert_eq!(opened.body, "both");
    assert_eq!(opened.verified_by.as_deref(), Some(alice_key.key_id.as_str()));

    // Bob now holds Alice's key and Alice holds Bob's.
    let bob_received = h.mail.list_received_keys(bob.id).await.unwrap();
    assert_eq!(bob_received.len(), 1);
    assert_eq!(bob_received[0].key_id, alice_key.key_id);
}

#[tokio::test]
async fn test_failed_commit_leaves_nothing_behind() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    h.keygen(&alice, "pw").await;
    h.keygen(&bob, "pw").await;
    h.store.set_fail_commits(true).unwrap();

    let err = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "x", true, true, "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(h.store.message_count().unwrap(), 0);
    assert!(h.mail.list_received_keys(alice.id).await.unwrap().is_empty());
    assert!(h.mail.list_received_keys(bob.id).await.unwrap().is_empty());

    h.store.set_fail_commits(false).unwrap();
    h.mail
        .compose(alice.id, compose(&["bob@example.com"], "x", true, true, "pw"))
        .await
        .unwrap();
    assert_eq!(h.store.message_count().unwrap(), 2);
}

#[tokio::test]
async fn test_delete_message_removes_binding() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");
    let bob = h.user("bob@example.com");
    h.keygen(&bob, "pw").await;

    let sent = h
        .mail
        .compose(alice.id, compose(&["bob@example.com"], "x", true, false, ""))
        .await
        .unwrap();
    let id = sent.message_ids[0];

    // Only the owner can delete a copy.
    let err = h.mail.delete_message(alice.id, id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    h.mail.delete_message(bob.id, id).await.unwrap();
    assert!(h.store.get_binding(id).await.unwrap().is_none());
    let err = h.mail.get_message(bob.id, id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_error_body_serializes_for_callers() {
    let h = Harness::new();
    let alice = h.user("alice@example.com");

    let err = h
        .mail
        .compose(alice.id, compose(&["ghost@example.com"], "x", false, false, ""))
        .await
        .unwrap_err();
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["code"], "RecipientNotFound");
    assert_eq!(json["recipient"], "ghost@example.com");
    assert!(json["message"].as_str().unwrap().contains("ghost@example.com"));
}
