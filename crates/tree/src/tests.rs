use crate::{ProcessEnv, Status, Tree};
use http::HeaderMap;
use http::header;
use surrogate_segment::SegmentList;
use surrogate_vars::VarState;

fn vars() -> VarState {
    VarState::new(HeaderMap::new(), "/")
}

fn pass(tree: &mut Tree, vars: &mut VarState, next: &mut u64) -> (Status, Vec<crate::FetchRequest>) {
    let mut env = ProcessEnv::new(vars, next);
    let status = tree.process(&mut env);
    (status, env.fetches)
}

fn rendered(tree: &mut Tree) -> String {
    let mut out = SegmentList::new();
    tree.render(&mut out);
    out.flatten_string()
}

fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn literal_sequences_complete_and_render_in_order() {
    let mut tree = Tree::new();
    let root = tree.root();
    for text in ["a", "b", "c"] {
        let lit = tree.new_literal(text.as_bytes());
        assert!(tree.add_child(root, lit));
    }
    let (status, fetches) = pass(&mut tree, &mut vars(), &mut 0);
    assert_eq!(status, Status::Complete);
    assert!(fetches.is_empty());
    assert!(!tree.may_fail());
    // Adjacent literals merged into one node.
    assert_eq!(rendered(&mut tree), "abc");
    assert_eq!(rendered(&mut tree), "");
}

#[test]
fn include_blocks_the_stream_until_resolved() {
    let mut tree = Tree::new();
    let root = tree.root();
    let before = tree.new_literal(b"before|");
    tree.add_child(root, before);
    let include = tree.new_include(&attrs(&[("src", "/frag")]));
    tree.add_child(root, include);
    let after = tree.new_literal(b"|after");
    tree.add_child(root, after);

    let mut state = vars();
    let mut next = 0;
    let (status, fetches) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::PendingMayFail);
    assert!(tree.may_fail());
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].url, "/frag");

    // A second pass issues nothing new.
    let (_, fetches_again) = pass(&mut tree, &mut state, &mut next);
    assert!(fetches_again.is_empty());

    tree.sub_request_done(
        fetches[0].node,
        fetches[0].id,
        Some(SegmentList::from_bytes(b"FRAG")),
    );
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "before|FRAG|after");
}

#[test]
fn include_with_onerror_continue_cannot_fail() {
    let mut tree = Tree::new();
    let root = tree.root();
    let lit = tree.new_literal(b"kept:");
    tree.add_child(root, lit);
    let include = tree.new_include(&attrs(&[("src", "/frag"), ("onerror", "continue")]));
    tree.add_child(root, include);

    let mut state = vars();
    let mut next = 0;
    let (status, fetches) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::PendingWontFail);
    assert!(!tree.may_fail());
    // The prefix may stream while the include is outstanding.
    assert_eq!(rendered(&mut tree), "kept:");

    tree.sub_request_done(fetches[0].node, fetches[0].id, None);
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "");
}

#[test]
fn alternate_url_saves_a_failed_primary() {
    let mut tree = Tree::new();
    let root = tree.root();
    let include = tree.new_include(&attrs(&[("src", "/a"), ("alt", "/b")]));
    tree.add_child(root, include);

    let mut state = vars();
    let mut next = 0;
    let (status, fetches) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::PendingMayFail);
    assert_eq!(fetches.len(), 2);

    tree.sub_request_done(fetches[0].node, fetches[0].id, None);
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::PendingMayFail);

    tree.sub_request_done(fetches[1].node, fetches[1].id, Some(SegmentList::from_bytes(b"ALT")));
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "ALT");
}

#[test]
fn primary_content_wins_over_an_earlier_alternate() {
    let mut tree = Tree::new();
    let root = tree.root();
    let include = tree.new_include(&attrs(&[("src", "/a"), ("alt", "/b")]));
    tree.add_child(root, include);

    let mut state = vars();
    let mut next = 0;
    let (_, fetches) = pass(&mut tree, &mut state, &mut next);
    tree.sub_request_done(fetches[1].node, fetches[1].id, Some(SegmentList::from_bytes(b"ALT")));
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::PendingMayFail);
    tree.sub_request_done(fetches[0].node, fetches[0].id, Some(SegmentList::from_bytes(b"SRC")));
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "SRC");
}

#[test]
fn both_branches_failing_fails_the_document() {
    let mut tree = Tree::new();
    let root = tree.root();
    let include = tree.new_include(&attrs(&[("src", "/a"), ("alt", "/b")]));
    tree.add_child(root, include);

    let mut state = vars();
    let mut next = 0;
    let (_, fetches) = pass(&mut tree, &mut state, &mut next);
    tree.sub_request_done(fetches[0].node, fetches[0].id, None);
    tree.sub_request_done(fetches[1].node, fetches[1].id, None);
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::Failed);
}

#[test]
fn include_urls_substitute_variables() {
    let mut headers = HeaderMap::new();
    headers.insert(header::HOST, "example.org".parse().unwrap());
    let mut state = VarState::new(headers, "/");

    let mut tree = Tree::new();
    let root = tree.root();
    let include = tree.new_include(&attrs(&[("src", "/frag?h=$(HTTP_HOST)")]));
    tree.add_child(root, include);

    let (_, fetches) = pass(&mut tree, &mut state, &mut 0);
    assert_eq!(fetches[0].url, "/frag?h=example.org");
}

#[test]
fn choose_picks_the_first_true_when() {
    let mut tree = Tree::new();
    let root = tree.root();
    let choose = tree.new_choose();
    tree.add_child(root, choose);
    for (test, value, text) in [
        ("1==2", false, "first"),
        ("1==1", true, "second"),
        ("2==2", true, "third"),
    ] {
        let when = tree.new_when(test.to_string(), value);
        let lit = tree.new_literal(text.as_bytes());
        tree.add_child(when, lit);
        assert!(tree.add_child(choose, when));
    }
    let otherwise = tree.new_otherwise();
    let lit = tree.new_literal(b"fallback");
    tree.add_child(otherwise, lit);
    assert!(tree.add_child(choose, otherwise));

    let (status, _) = pass(&mut tree, &mut vars(), &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "second");
}

#[test]
fn choose_falls_back_to_otherwise() {
    let mut tree = Tree::new();
    let root = tree.root();
    let choose = tree.new_choose();
    tree.add_child(root, choose);
    let when = tree.new_when("1==2".to_string(), false);
    tree.add_child(choose, when);
    let otherwise = tree.new_otherwise();
    let lit = tree.new_literal(b"fallback");
    tree.add_child(otherwise, lit);
    tree.add_child(choose, otherwise);

    let (status, _) = pass(&mut tree, &mut vars(), &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "fallback");
}

#[test]
fn choose_without_when_clauses_fails() {
    let mut tree = Tree::new();
    let root = tree.root();
    let choose = tree.new_choose();
    tree.add_child(root, choose);

    let (status, _) = pass(&mut tree, &mut vars(), &mut 0);
    assert_eq!(status, Status::Failed);
    assert!(tree.may_fail());
}

#[test]
fn choose_with_no_match_and_no_otherwise_renders_nothing() {
    let mut tree = Tree::new();
    let root = tree.root();
    let a = tree.new_literal(b"a");
    tree.add_child(root, a);
    let choose = tree.new_choose();
    tree.add_child(root, choose);
    let when = tree.new_when("1==2".to_string(), false);
    tree.add_child(choose, when);
    let b = tree.new_literal(b"b");
    tree.add_child(root, b);

    let (status, _) = pass(&mut tree, &mut vars(), &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "ab");
}

#[test]
fn try_prefers_a_successful_attempt() {
    let mut tree = Tree::new();
    let root = tree.root();
    let attempts = tree.new_try();
    tree.add_child(root, attempts);
    let attempt = tree.new_attempt();
    let lit = tree.new_literal(b"primary");
    tree.add_child(attempt, lit);
    assert!(tree.add_child(attempts, attempt));
    let except = tree.new_except();
    let lit = tree.new_literal(b"recovery");
    tree.add_child(except, lit);
    assert!(tree.add_child(attempts, except));

    let (status, _) = pass(&mut tree, &mut vars(), &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "primary");
}

#[test]
fn try_recovers_through_the_except_clause() {
    let mut tree = Tree::new();
    let root = tree.root();
    let attempts = tree.new_try();
    tree.add_child(root, attempts);
    let attempt = tree.new_attempt();
    let include = tree.new_include(&attrs(&[("src", "/fails")]));
    tree.add_child(attempt, include);
    tree.add_child(attempts, attempt);
    let except = tree.new_except();
    let lit = tree.new_literal(b"recovery");
    tree.add_child(except, lit);
    tree.add_child(attempts, except);

    let mut state = vars();
    let mut next = 0;
    let (status, fetches) = pass(&mut tree, &mut state, &mut next);
    // Attempt may fail, except already proved itself: overall cannot fail.
    assert_eq!(status, Status::PendingWontFail);
    assert!(!tree.may_fail());

    tree.sub_request_done(fetches[0].node, fetches[0].id, None);
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "recovery");
}

#[test]
fn try_fails_when_both_clauses_fail() {
    let mut tree = Tree::new();
    let root = tree.root();
    let attempts = tree.new_try();
    tree.add_child(root, attempts);
    let attempt = tree.new_attempt();
    let a = tree.new_include(&attrs(&[("src", "/a")]));
    tree.add_child(attempt, a);
    tree.add_child(attempts, attempt);
    let except = tree.new_except();
    let b = tree.new_include(&attrs(&[("src", "/b")]));
    tree.add_child(except, b);
    tree.add_child(attempts, except);

    let mut state = vars();
    let mut next = 0;
    let (_, fetches) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(fetches.len(), 2);
    for fetch in &fetches {
        tree.sub_request_done(fetch.node, fetch.id, None);
    }
    let (status, _) = pass(&mut tree, &mut state, &mut next);
    assert_eq!(status, Status::Failed);
}

#[test]
fn attempt_and_except_are_rejected_outside_try() {
    let mut tree = Tree::new();
    let root = tree.root();
    let attempt = tree.new_attempt();
    assert!(!tree.add_child(root, attempt));
    let except = tree.new_except();
    assert!(!tree.add_child(root, except));
}

#[test]
fn vars_subtree_substitutes_literals_once() {
    let mut headers = HeaderMap::new();
    headers.insert(header::COOKIE, "user=ada".parse().unwrap());
    let mut state = VarState::new(headers, "/");

    let mut tree = Tree::new();
    let root = tree.root();
    let vars_node = tree.new_vars();
    tree.add_child(root, vars_node);
    let lit = tree.new_literal(b"hi $(HTTP_COOKIE{user})");
    tree.add_child(vars_node, lit);

    let (status, _) = pass(&mut tree, &mut state, &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "hi ada");
}

#[test]
fn assign_binds_before_later_references() {
    let mut state = vars();
    let mut tree = Tree::new();
    let root = tree.root();
    let assign = tree.new_assign("who".to_string(), Some("world".to_string()));
    tree.add_child(root, assign);
    let vars_node = tree.new_vars();
    tree.add_child(root, vars_node);
    let lit = tree.new_literal(b"hello $(who)");
    tree.add_child(vars_node, lit);

    let (status, _) = pass(&mut tree, &mut state, &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut tree), "hello world");
}

#[test]
fn remove_content_is_swallowed_at_build_time() {
    let mut tree = Tree::new();
    let root = tree.root();
    let remove = tree.new_remove();
    tree.add_child(root, remove);
    let lit = tree.new_literal(b"never shown");
    assert!(tree.add_child(remove, lit));
    let nested = tree.new_include(&attrs(&[("src", "/x")]));
    assert!(!tree.add_child(remove, nested));
}

#[test]
fn cached_snapshot_replays_for_a_new_request() {
    let mut tree = Tree::new();
    let root = tree.root();
    let lit = tree.new_literal(b"static|");
    tree.add_child(root, lit);
    let choose = tree.new_choose();
    tree.add_child(root, choose);
    let when = tree.new_when("1==1".to_string(), true);
    let lit = tree.new_literal(b"picked");
    tree.add_child(when, lit);
    tree.add_child(choose, when);

    let snapshot = tree.make_cacheable();

    // Process and render the original to completion.
    let mut state = vars();
    let (status, _) = pass(&mut tree, &mut state, &mut 0);
    assert_eq!(status, Status::Complete);
    let first = rendered(&mut tree);

    // Instantiate the snapshot for a second request.
    let mut state2 = vars();
    let mut replay = snapshot.instantiate(&mut state2);
    let (status, _) = pass(&mut replay, &mut state2, &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut replay), first);
    assert_eq!(first, "static|picked");
}

#[test]
fn cached_snapshot_reverts_substituted_literals() {
    let mut headers = HeaderMap::new();
    headers.insert(header::HOST, "one".parse().unwrap());
    let mut state = VarState::new(headers, "/");

    let mut tree = Tree::new();
    let root = tree.root();
    let vars_node = tree.new_vars();
    tree.add_child(root, vars_node);
    let lit = tree.new_literal(b"host=$(HTTP_HOST)");
    tree.add_child(vars_node, lit);

    let (_, _) = pass(&mut tree, &mut state, &mut 0);
    // Snapshot after substitution already ran; it must keep the raw text.
    let snapshot = tree.make_cacheable();

    let mut headers2 = HeaderMap::new();
    headers2.insert(header::HOST, "two".parse().unwrap());
    let mut state2 = VarState::new(headers2, "/");
    let mut replay = snapshot.instantiate(&mut state2);
    let (status, _) = pass(&mut replay, &mut state2, &mut 0);
    assert_eq!(status, Status::Complete);
    assert_eq!(rendered(&mut replay), "host=two");
}

#[test]
fn teardown_discards_everything() {
    let mut tree = Tree::new();
    let root = tree.root();
    let lit = tree.new_literal(b"gone");
    tree.add_child(root, lit);
    tree.teardown();
    assert!(tree.may_fail());
    assert_eq!(rendered(&mut tree), "");
}
