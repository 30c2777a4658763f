#[path = "../common/mod.rs"]
mod common;

use agentboard::core::error::BoardError;
use agentboard::core::target::TargetKind;
use agentboard::plugins::{posts, threads};

#[test]
fn test_create_and_read_post() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 5);

    let post = posts::create_post(&board, &author, "rust", "  Ownership  ", "borrowck").unwrap();
    assert_eq!(post.title, "Ownership");
    assert_eq!(common::used_today(&board, &author), 1);

    let fetched = posts::get_post(&board, &post.id).unwrap();
    assert_eq!(fetched, post);
}

#[test]
fn test_list_board_newest_first() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 20);
    let ids: Vec<String> = (0..4)
        .map(|i| {
            posts::create_post(&board, &author, "general", &format!("post {}", i), "")
                .unwrap()
                .id
        })
        .collect();
    posts::create_post(&board, &author, "other", "elsewhere", "").unwrap();

    let page = posts::list_board(&board, "general", 1, 3).unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 3);
    for pair in page.items.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at);
    }
    let rest = posts::list_board(&board, "general", 2, 3).unwrap();
    assert_eq!(rest.items.len(), 1);

    let mut listed: Vec<String> = page
        .items
        .iter()
        .chain(rest.items.iter())
        .map(|p| p.id.clone())
        .collect();
    listed.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(listed, expected);
}

#[test]
fn test_post_validation_costs_nothing() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 5);
    for (slug, title) in [("Bad Slug", "t"), ("general", ""), ("", "t")] {
        assert!(matches!(
            posts::create_post(&board, &author, slug, title, ""),
            Err(BoardError::ValidationError(_))
        ));
    }
    assert_eq!(common::used_today(&board, &author), 0);
}

#[test]
fn test_delete_post_keeps_replies_addressable() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 10);
    let other = common::agent(&board, "other", 10);
    let post = common::post(&board, &author);
    let reply = threads::create_node(&board, TargetKind::Post, &post, &other, "hello").unwrap();

    assert!(matches!(
        posts::delete_post(&board, &other, &post),
        Err(BoardError::NotFound(_))
    ));
    posts::delete_post(&board, &author, &post).unwrap();

    assert!(matches!(
        posts::get_post(&board, &post),
        Err(BoardError::NotFound(_))
    ));
    assert_eq!(threads::get_node(&board, &reply.id).unwrap().id, reply.id);
    assert_eq!(threads::materialize(&board, &post).unwrap().len(), 1);
    assert_eq!(posts::list_board(&board, "general", 1, 10).unwrap().total, 0);
    assert!(matches!(
        threads::create_node(&board, TargetKind::Post, &post, &other, "late"),
        Err(BoardError::NotFound(_))
    ));
}

#[test]
fn test_quota_exhaustion_blocks_posting() {
    let (_tmp, board) = common::board();
    let author = common::agent(&board, "author", 1);
    common::post(&board, &author);
    assert!(matches!(
        posts::create_post(&board, &author, "general", "again", ""),
        Err(BoardError::QuotaExceeded { .. })
    ));
    assert_eq!(posts::list_board(&board, "general", 1, 10).unwrap().total, 1);
}
