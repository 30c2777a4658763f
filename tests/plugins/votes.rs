#[path = "../common/mod.rs"]
mod common;

use agentboard::core::error::{BoardError, ConflictKind};
use agentboard::core::target::TargetKind;
use agentboard::plugins::notify::NotificationKind;
use agentboard::plugins::{posts, threads, votes};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

fn vote_count(board: &agentboard::Board, kind: TargetKind, id: &str) -> i64 {
    votes::audit(board, kind, id).unwrap().vote_count
}

#[test]
fn test_cast_amend_retract_scenario() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let p1 = common::agent(&board, "voter", 50);
    let post = common::post(&board, &author);

    let vote = votes::cast(&board, &p1, TargetKind::Post, &post, 1).unwrap();
    assert_eq!(vote_count(&board, TargetKind::Post, &post), 1);

    let err = votes::cast(&board, &p1, TargetKind::Post, &post, 1).unwrap_err();
    assert!(matches!(err, BoardError::Conflict(ConflictKind::AlreadyVoted)));
    assert_eq!(vote_count(&board, TargetKind::Post, &post), 1);

    let amended = votes::amend(&board, &p1, &vote.id, -1).unwrap();
    assert_eq!(amended.value, -1);
    assert_eq!(vote_count(&board, TargetKind::Post, &post), -1);

    let retracted = votes::retract(&board, &p1, &vote.id).unwrap();
    assert_eq!(retracted.id, vote.id);
    assert_eq!(vote_count(&board, TargetKind::Post, &post), 0);
    assert!(
        votes::my_vote(&board, &p1, TargetKind::Post, &post)
            .unwrap()
            .is_none()
    );

    // Once retracted, the agent may vote again.
    votes::cast(&board, &p1, TargetKind::Post, &post, -1).unwrap();
    assert_eq!(vote_count(&board, TargetKind::Post, &post), -1);
}

#[test]
fn test_cast_rejects_bad_input_without_side_effects() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let voter = common::agent(&board, "voter", 50);
    let post = common::post(&board, &author);

    let err = votes::cast(&board, &voter, TargetKind::Post, &post, 2).unwrap_err();
    assert!(matches!(err, BoardError::ValidationError(_)));

    let err = votes::cast(&board, &voter, TargetKind::Reply, &post, 1).unwrap_err();
    assert!(matches!(err, BoardError::NotFound(_)));

    let err = votes::cast(&board, &voter, TargetKind::Post, "missing", 1).unwrap_err();
    assert_eq!(err.status_code(), 404);

    let err = "comment".parse::<TargetKind>().unwrap_err();
    assert!(matches!(err, BoardError::InvalidTarget(_)));

    assert_eq!(common::used_today(&board, &voter), 0);
    assert_eq!(vote_count(&board, TargetKind::Post, &post), 0);
}

#[test]
fn test_amend_and_retract_are_owner_only() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let voter = common::agent(&board, "voter", 50);
    let intruder = common::agent(&board, "intruder", 50);
    let post = common::post(&board, &author);
    let vote = votes::cast(&board, &voter, TargetKind::Post, &post, 1).unwrap();

    assert!(matches!(
        votes::amend(&board, &intruder, &vote.id, -1),
        Err(BoardError::NotFound(_))
    ));
    assert!(matches!(
        votes::retract(&board, &intruder, &vote.id),
        Err(BoardError::NotFound(_))
    ));
    assert!(matches!(
        votes::retract(&board, &voter, "no-such-vote"),
        Err(BoardError::NotFound(_))
    ));
    assert_eq!(vote_count(&board, TargetKind::Post, &post), 1);
}

#[test]
fn test_cast_consumes_quota_but_amend_does_not() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let voter = common::agent(&board, "voter", 1);
    let post = common::post(&board, &author);
    let reply = threads::create_node(&board, TargetKind::Post, &post, &author, "hi").unwrap();

    let vote = votes::cast(&board, &voter, TargetKind::Post, &post, 1).unwrap();
    assert_eq!(common::used_today(&board, &voter), 1);

    let err = votes::cast(&board, &voter, TargetKind::Reply, &reply.id, 1).unwrap_err();
    assert!(matches!(err, BoardError::QuotaExceeded { daily_limit: 1, .. }));
    assert_eq!(vote_count(&board, TargetKind::Reply, &reply.id), 0);

    votes::amend(&board, &voter, &vote.id, -1).unwrap();
    votes::retract(&board, &voter, &vote.id).unwrap();
    assert_eq!(common::used_today(&board, &voter), 1);
}

#[test]
fn test_concurrent_casts_apply_exactly_once() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let voter = common::agent(&board, "voter", 50);
    let post = common::post(&board, &author);

    let board = Arc::new(board);
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let board = Arc::clone(&board);
            let barrier = Arc::clone(&barrier);
            let voter = voter.clone();
            let post = post.clone();
            std::thread::spawn(move || {
                barrier.wait();
                votes::cast(&board, &voter, TargetKind::Post, &post, 1)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(BoardError::Conflict(ConflictKind::AlreadyVoted))))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(vote_count(&board, TargetKind::Post, &post), 1);
    assert_eq!(common::used_today(&board, &voter), 1);
}

#[test]
fn test_counter_matches_sum_after_mixed_sequence() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let post = common::post(&board, &author);
    let voters: Vec<String> = (0..6)
        .map(|i| common::agent(&board, &format!("voter_{}", i), 50))
        .collect();

    let mut cast = Vec::new();
    for (i, voter) in voters.iter().enumerate() {
        let value = if i % 2 == 0 { 1 } else { -1 };
        cast.push(votes::cast(&board, voter, TargetKind::Post, &post, value).unwrap());
    }
    votes::amend(&board, &voters[1], &cast[1].id, 1).unwrap();
    votes::amend(&board, &voters[2], &cast[2].id, 1).unwrap();
    votes::retract(&board, &voters[3], &cast[3].id).unwrap();
    votes::amend(&board, &voters[4], &cast[4].id, -1).unwrap();
    votes::retract(&board, &voters[4], &cast[4].id).unwrap();

    let audit = votes::audit(&board, TargetKind::Post, &post).unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.vote_count, 2);
    assert_eq!(audit.vote_sum, 2);
}

#[test]
fn test_expired_request_leaves_votes_and_quota_untouched() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let voter = common::agent(&board, "voter", 50);
    let post = common::post(&board, &author);
    let kept = votes::cast(&board, &voter, TargetKind::Post, &post, 1).unwrap();
    let used = common::used_today(&board, &voter);

    let late = board.until(Instant::now());
    let other = common::agent(&board, "other", 50);
    let err = votes::cast(&late, &other, TargetKind::Post, &post, -1).unwrap_err();
    assert!(err.is_cancelled(), "expected cancellation, got {err}");
    assert!(votes::amend(&late, &voter, &kept.id, -1).unwrap_err().is_cancelled());
    assert!(votes::retract(&late, &voter, &kept.id).unwrap_err().is_cancelled());

    assert_eq!(vote_count(&board, TargetKind::Post, &post), 1);
    assert_eq!(common::used_today(&board, &voter), used);
    assert_eq!(common::used_today(&board, &other), 0);
    assert!(
        votes::my_vote(&board, &other, TargetKind::Post, &post)
            .unwrap()
            .is_none()
    );

    // The unscoped board is unaffected, and a generous deadline goes through.
    let in_time = board.until(Instant::now() + Duration::from_secs(30));
    votes::cast(&in_time, &other, TargetKind::Post, &post, -1).unwrap();
    assert_eq!(vote_count(&board, TargetKind::Post, &post), 0);
}

#[test]
fn test_tally_pages_in_creation_order() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let post = common::post(&board, &author);
    let mut ids = Vec::new();
    for i in 0..5 {
        let voter = common::agent(&board, &format!("voter_{}", i), 50);
        ids.push(votes::cast(&board, &voter, TargetKind::Post, &post, 1).unwrap().id);
    }

    // Pin creation times so the order is known: two votes share a timestamp.
    let created = [3000_i64, 1000, 2000, 1000, 500];
    board
        .broker()
        .with_tx("test", "test.pin_created_at", |tx| {
            for (id, at) in ids.iter().zip(created) {
                tx.execute(
                    "UPDATE votes SET created_at = ?1 WHERE id = ?2",
                    rusqlite::params![at, id],
                )?;
            }
            Ok(())
        })
        .unwrap();
    let (tie_first, tie_second) = if ids[1] < ids[3] {
        (&ids[1], &ids[3])
    } else {
        (&ids[3], &ids[1])
    };
    let expected = vec![
        ids[4].clone(),
        tie_first.clone(),
        tie_second.clone(),
        ids[2].clone(),
        ids[0].clone(),
    ];

    let first = votes::tally(&board, TargetKind::Post, &post, 1, 2).unwrap();
    assert_eq!(first.total, 5);
    assert!(first.has_more());
    let mut seen: Vec<String> = first.items.iter().map(|v| v.id.clone()).collect();
    for page in 2..=3 {
        let next = votes::tally(&board, TargetKind::Post, &post, page, 2).unwrap();
        seen.extend(next.items.iter().map(|v| v.id.clone()));
    }
    assert_eq!(seen, expected);

    let clamped = votes::tally(&board, TargetKind::Post, &post, 0, 1000).unwrap();
    assert_eq!((clamped.page, clamped.page_size), (1, 100));
    assert_eq!(clamped.items.len(), 5);

    assert!(matches!(
        votes::tally(&board, TargetKind::Reply, "nope", 1, 10),
        Err(BoardError::NotFound(_))
    ));
}

#[test]
fn test_deleted_target_rejects_new_votes_but_keeps_counter() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 50);
    let voter = common::agent(&board, "voter", 50);
    let late = common::agent(&board, "late", 50);
    let post = common::post(&board, &author);
    let vote = votes::cast(&board, &voter, TargetKind::Post, &post, 1).unwrap();

    posts::delete_post(&board, &author, &post).unwrap();
    assert!(matches!(
        votes::cast(&board, &late, TargetKind::Post, &post, 1),
        Err(BoardError::NotFound(_))
    ));
    votes::retract(&board, &voter, &vote.id).unwrap();
    let audit = votes::audit(&board, TargetKind::Post, &post).unwrap();
    assert_eq!(audit.vote_count, 0);
    assert!(audit.consistent);
}

#[test]
fn test_cast_notifies_author_but_not_self() {
    let (_tmp, board, sink) = common::board_with_sink();
    let author = common::agent(&board, "author", 50);
    let voter = common::agent(&board, "voter", 50);
    let post = common::post(&board, &author);

    votes::cast(&board, &author, TargetKind::Post, &post, 1).unwrap();
    assert!(sink.snapshot().is_empty());

    votes::cast(&board, &voter, TargetKind::Post, &post, -1).unwrap();
    let delivered = sink.snapshot();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, NotificationKind::VoteCast);
    assert_eq!(delivered[0].recipient_id, author);
    assert_eq!(delivered[0].actor_id, voter);
    assert_eq!(delivered[0].target_id, post);
}
