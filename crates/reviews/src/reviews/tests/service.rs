use std::sync::Arc;

use super::common::*;
use crate::events::subscriber::UserEventHandler;
use crate::events::UserEvent;
use crate::reviews::domain::{
    LoggedUser, ReviewPatch, ReviewTarget, ReviewType, UserDeleted, UsernameChange,
};
use crate::reviews::query::ReviewQuery;
use crate::reviews::repository::ReviewRepository;
use crate::reviews::service::{ErrorKind, ReviewService, ReviewServiceError};
use crate::reviews::validation::ValidationError;

#[tokio::test]
async fn guest_creates_accommodation_review_and_emits_rating() {
    let (service, store, oracle, publisher) = build_service(StubOracle::allowing());
    let alice = LoggedUser::guest("alice");

    let review = service
        .create_review(&alice, Some(&accommodation_input("apt-7", 4)))
        .await
        .expect("review created");

    assert_eq!(review.reviewer_username, "alice");
    assert_eq!(review.entity_id(), Some("apt-7"));
    assert_eq!(oracle.calls(), 1);

    let stored = service
        .get_review(&review.id.to_string())
        .await
        .expect("stored review");
    assert_eq!(stored, review);
    assert_eq!(store.len().await, 1);

    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ReviewType::Accommodation);
    assert_eq!(events[0].rating.value(), 4);
}

#[tokio::test]
async fn reviewer_is_always_the_caller() {
    let (service, _, _, _) = build_service(StubOracle::allowing());
    let mut input = host_input("henry", 5);
    input.comment = Some("Great host".to_string());

    let review = service
        .create_review(&LoggedUser::guest("alice"), Some(&input))
        .await
        .expect("review created");

    assert!(review.is_authored_by("alice"));
    assert_eq!(
        review.target,
        ReviewTarget::Host {
            host_username: "henry".to_string()
        }
    );
}

#[tokio::test]
async fn host_cannot_leave_review() {
    let (service, store, oracle, _) = build_service(StubOracle::allowing());

    let err = service
        .create_review(&LoggedUser::host("henry"), Some(&accommodation_input("apt-7", 4)))
        .await
        .expect_err("hosts are refused");

    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.to_string(), "Only guest can leave review");
    assert_eq!(oracle.calls(), 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn invalid_payload_is_rejected_before_the_oracle_is_asked() {
    let (service, store, oracle, _) = build_service(StubOracle::allowing());
    let alice = LoggedUser::guest("alice");
    let mut input = accommodation_input("apt-7", 4);
    input.entity_id = None;

    match service.create_review(&alice, Some(&input)).await {
        Err(ReviewServiceError::Validation(ValidationError::MissingEntityId)) => {}
        other => panic!("expected missing entity id, got {other:?}"),
    }
    match service.create_review(&alice, None).await {
        Err(err) => assert_eq!(err.to_string(), "Missing review parameter"),
        other => panic!("expected missing review, got {other:?}"),
    }
    match service
        .create_review(&alice, Some(&accommodation_input("apt-7", 9)))
        .await
    {
        Err(err) => assert_eq!(err.kind(), ErrorKind::BadRequest),
        other => panic!("expected invalid rating, got {other:?}"),
    }

    assert_eq!(oracle.calls(), 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn oracle_denial_is_forbidden_and_names_the_target() {
    let (service, store, _, publisher) = build_service(StubOracle::denying());

    let err = service
        .create_review(&LoggedUser::guest("alice"), Some(&host_input("henry", 3)))
        .await
        .expect_err("denied");

    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(
        err.to_string(),
        "User does not have permission to leave review for this host"
    );
    assert!(store.is_empty().await);
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn oracle_failure_is_internal() {
    let (service, store, _, _) = build_service(StubOracle::failing());

    match service
        .create_review(&LoggedUser::guest("alice"), Some(&host_input("henry", 3)))
        .await
    {
        Err(err @ ReviewServiceError::Permission(_)) => {
            assert_eq!(err.kind(), ErrorKind::Internal)
        }
        other => panic!("expected permission failure, got {other:?}"),
    }
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn publish_failure_keeps_review_but_reports_error() {
    let (service, store, _, _) =
        build_service_with_publisher(StubOracle::allowing(), RecordingPublisher::failing());

    let err = service
        .create_review(&LoggedUser::guest("alice"), Some(&accommodation_input("apt-7", 5)))
        .await
        .expect_err("emission failure surfaces");

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(
        err.to_string(),
        "Failed to emit accommodation-review-created event"
    );
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn get_review_distinguishes_bad_and_unknown_ids() {
    let (service, _, _, _) = build_service(StubOracle::allowing());

    assert_eq!(
        service.get_review("").await.expect_err("empty").kind(),
        ErrorKind::BadRequest
    );
    assert_eq!(
        service
            .get_review("not-a-uuid")
            .await
            .expect_err("invalid")
            .kind(),
        ErrorKind::BadRequest
    );
    assert!(matches!(
        service
            .get_review("6f1c2d9e-4a1b-4c3d-8e2f-0a1b2c3d4e5f")
            .await,
        Err(ReviewServiceError::NotFound)
    ));
}

#[tokio::test]
async fn listing_by_user_applies_query_narrowing() {
    let (service, _, _, _) = build_service(StubOracle::allowing());
    let alice = LoggedUser::guest("alice");
    for (entity, rating) in [("apt-7", 4), ("apt-9", 2)] {
        service
            .create_review(&alice, Some(&accommodation_input(entity, rating)))
            .await
            .expect("created");
    }
    service
        .create_review(&alice, Some(&host_input("henry", 5)))
        .await
        .expect("created");
    service
        .create_review(&LoggedUser::guest("bob"), Some(&accommodation_input("apt-7", 1)))
        .await
        .expect("created");

    let all = service
        .get_reviews_by_user(&alice, &ReviewQuery::default())
        .await
        .expect("listed");
    assert_eq!(all.len(), 3);

    let narrowed = service
        .get_reviews_by_user(&alice, &ReviewQuery::from_pairs([("entityId", "apt-9/extra")]))
        .await
        .expect("listed");
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].rating.value(), 2);

    let for_apartment = service
        .get_reviews_by_accommodation("apt-7")
        .await
        .expect("listed");
    assert_eq!(for_apartment.len(), 2);

    let for_host = service.get_reviews_by_host("henry").await.expect("listed");
    assert_eq!(for_host.len(), 1);
    assert!(service.get_reviews_by_host("").await.is_err());
}

#[tokio::test]
async fn only_the_author_may_update_or_delete() {
    let (service, store, _, _) = build_service(StubOracle::allowing());
    let review = seed_review(&store, "bob").await;
    let id = review.id.to_string();
    let alice = LoggedUser::guest("alice");
    let patch = ReviewPatch {
        rating: Some(1),
        comment: None,
    };

    let err = service
        .update_review(&alice, &id, &patch)
        .await
        .expect_err("not the author");
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(
        err.to_string(),
        "User does not have permission to update review"
    );

    let err = service
        .delete_review(&alice, &id)
        .await
        .expect_err("not the author");
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let stored = store.get(&review.id).await.expect("read").expect("present");
    assert_eq!(stored, review);
}

#[tokio::test]
async fn author_updates_and_deletes_own_review() {
    let (service, store, _, _) = build_service(StubOracle::allowing());
    let review = seed_review(&store, "bob").await;
    let id = review.id.to_string();
    let bob = LoggedUser::guest("bob");

    let changed = service
        .update_review(
            &bob,
            &id,
            &ReviewPatch {
                rating: Some(2),
                comment: Some("Noisy at night".to_string()),
            },
        )
        .await
        .expect("updated");
    assert!(changed);

    let stored = service.get_review(&id).await.expect("present");
    assert_eq!(stored.rating.value(), 2);
    assert_eq!(stored.comment.as_deref(), Some("Noisy at night"));

    let unchanged = service
        .update_review(&bob, &id, &ReviewPatch::default())
        .await
        .expect("empty patch accepted");
    assert!(!unchanged);

    assert!(service.delete_review(&bob, &id).await.expect("deleted"));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn editing_missing_review_or_as_host_is_rejected() {
    let (service, store, _, _) = build_service(StubOracle::allowing());
    let review = seed_review(&store, "bob").await;

    let err = service
        .delete_review(
            &LoggedUser::guest("bob"),
            "6f1c2d9e-4a1b-4c3d-8e2f-0a1b2c3d4e5f",
        )
        .await
        .expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.to_string(), "Review not found");

    let err = service
        .delete_review(&LoggedUser::host("bob"), &review.id.to_string())
        .await
        .expect_err("hosts cannot delete");
    assert_eq!(err.to_string(), "Only guest can delete review");
}

#[tokio::test]
async fn rename_is_idempotent_and_reaches_host_references() {
    let (service, store, _, _) = build_service(StubOracle::allowing());
    seed_review(&store, "bob").await;
    service
        .create_review(&LoggedUser::guest("alice"), Some(&host_input("bob", 5)))
        .await
        .expect("created");

    let change = UsernameChange {
        old_username: "bob".to_string(),
        new_username: "robert".to_string(),
    };
    assert!(service.update_username(&change).await.expect("renamed"));
    assert!(!service.update_username(&change).await.expect("second run"));

    let hosted = service.get_reviews_by_host("robert").await.expect("listed");
    assert_eq!(hosted.len(), 1);
    let written = service
        .get_reviews_by_user(&LoggedUser::guest("robert"), &ReviewQuery::default())
        .await
        .expect("listed");
    assert_eq!(written.len(), 1);

    let invalid = UsernameChange {
        old_username: String::new(),
        new_username: "x".to_string(),
    };
    assert!(service.update_username(&invalid).await.is_err());
}

#[tokio::test]
async fn user_events_reconcile_the_store() {
    let (service, store, _, _) = build_service(StubOracle::allowing());
    seed_review(&store, "carol").await;
    seed_review(&store, "dave").await;
    service
        .create_review(&LoggedUser::guest("dave"), Some(&host_input("carol", 4)))
        .await
        .expect("created");

    service
        .handle(UserEvent::UserDeleted(UserDeleted {
            username: "carol".to_string(),
        }))
        .await
        .expect("handled");

    assert_eq!(store.len().await, 1);
    assert_eq!(service.delete_user("carol").await.expect("repeat"), 0);
}

#[tokio::test]
async fn repository_outage_is_internal() {
    let service = ReviewService::new(
        Arc::new(UnavailableRepository),
        Arc::new(StubOracle::allowing()),
        Arc::new(RecordingPublisher::default()),
    );

    let err = service
        .get_reviews_by_accommodation("apt-7")
        .await
        .expect_err("offline");
    assert_eq!(err.kind(), ErrorKind::Internal);
}
