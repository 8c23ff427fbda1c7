//! Reply trees, ancestor chains and flat interaction listings.
//!
//! Everything here is pure: callers load the relevant posts from the store
//! and pass them in. `reply_to` graphs come from remote documents and may be
//! cyclic, so every walk carries a visited set and a depth bound.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::{Post, PostKind, PostRef};

pub const MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyNode {
    pub post: String,
    pub children: Vec<ReplyNode>,
    pub moods: Vec<MoodGroup>,
}

/// Reactions to one post sharing an emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodGroup {
    pub emoji: String,
    pub posts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub post: String,
    pub emoji: String,
}

/// Flat interactions with one post, each list most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactions {
    pub reactions: Vec<Reaction>,
    pub replies: Vec<String>,
    pub boosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub root: String,
    pub replies: Vec<ReplyNode>,
}

/// Most recent first; feed URL breaks ties so output is stable.
fn newest_first(a: &&Post, b: &&Post) -> std::cmp::Ordering {
    b.post_id
        .cmp(&a.post_id)
        .then_with(|| a.feed_url.cmp(&b.feed_url))
}

fn reference(post: &Post) -> String {
    post.reference().to_string()
}

/// References of the posts `post` replies to, root first.
///
/// The walk ends at a post without `reply_to`, at a reference that is not
/// among `posts` (which is still included as the top of the chain), at a
/// cycle, or after `max_depth` steps. The chain never contains `post`.
pub fn ancestor_chain(post: &Post, posts: &[Post], max_depth: usize) -> Vec<String> {
    let by_ref: HashMap<String, &Post> = posts.iter().map(|p| (reference(p), p)).collect();

    let own = reference(post);
    let mut visited = HashSet::from([own.clone()]);
    let mut chain = Vec::new();
    let mut next = post.reply_to.clone();

    while let Some(parent) = next.take() {
        if chain.len() >= max_depth || !visited.insert(parent.clone()) {
            break;
        }
        next = by_ref.get(&parent).and_then(|p| p.reply_to.clone());
        chain.push(parent);
    }

    chain.reverse();
    chain
}

/// Reply tree below `root`.
///
/// Only `Reply` posts become nodes. `Reaction` posts are grouped by emoji
/// into the `moods` of the node they react to and never appear as children.
pub fn build_reply_tree(root: &PostRef, posts: &[Post], max_depth: usize) -> Vec<ReplyNode> {
    let index = ReplyIndex::new(posts);
    let root = root.to_string();
    let mut visited = HashSet::from([root.clone()]);
    index.children_of(&root, 1, max_depth, &mut visited)
}

/// Reply trees for every top-level post of `feed_url`, newest first.
pub fn profile_threads(feed_url: &str, posts: &[Post], max_depth: usize) -> Vec<Thread> {
    let index = ReplyIndex::new(posts);
    let mut roots: Vec<&Post> = posts
        .iter()
        .filter(|p| p.feed_url == feed_url && p.reply_to.is_none())
        .collect();
    roots.sort_by(newest_first);

    roots
        .into_iter()
        .map(|post| {
            let root = reference(post);
            let mut visited = HashSet::from([root.clone()]);
            let replies = index.children_of(&root, 1, max_depth, &mut visited);
            Thread { root, replies }
        })
        .collect()
}

/// Reactions, replies and boosts aimed at `target`.
pub fn interactions(target: &PostRef, posts: &[Post]) -> Interactions {
    let target = target.to_string();
    let mut sorted: Vec<&Post> = posts.iter().collect();
    sorted.sort_by(newest_first);

    let mut out = Interactions::default();
    for post in sorted {
        if post.include.as_deref() == Some(target.as_str()) && post.kind == PostKind::Boost {
            out.boosts.push(reference(post));
        }
        if post.reply_to.as_deref() != Some(target.as_str()) {
            continue;
        }
        match post.kind {
            PostKind::Reaction => out.reactions.push(Reaction {
                post: reference(post),
                emoji: post.mood.clone(),
            }),
            PostKind::Reply => out.replies.push(reference(post)),
            _ => {}
        }
    }
    out
}

struct ReplyIndex<'a> {
    replies: HashMap<&'a str, Vec<&'a Post>>,
    reactions: HashMap<&'a str, Vec<&'a Post>>,
}

impl<'a> ReplyIndex<'a> {
    fn new(posts: &'a [Post]) -> Self {
        let mut replies: HashMap<&str, Vec<&Post>> = HashMap::new();
        let mut reactions: HashMap<&str, Vec<&Post>> = HashMap::new();
        for post in posts {
            let Some(parent) = post.reply_to.as_deref() else {
                continue;
            };
            match post.kind {
                PostKind::Reply => replies.entry(parent).or_default().push(post),
                PostKind::Reaction => reactions.entry(parent).or_default().push(post),
                _ => {}
            }
        }
        for list in replies.values_mut().chain(reactions.values_mut()) {
            list.sort_by(newest_first);
        }
        Self { replies, reactions }
    }

    fn children_of(
        &self,
        parent: &str,
        depth: usize,
        max_depth: usize,
        visited: &mut HashSet<String>,
    ) -> Vec<ReplyNode> {
        if depth > max_depth {
            return Vec::new();
        }
        let Some(children) = self.replies.get(parent) else {
            return Vec::new();
        };

        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            let post = reference(child);
            if !visited.insert(post.clone()) {
                continue;
            }
            let moods = self.moods_of(&post);
            let children = self.children_of(&post, depth + 1, max_depth, visited);
            nodes.push(ReplyNode {
                post,
                children,
                moods,
            });
        }
        nodes
    }

    /// Groups keep the order of each emoji's most recent reaction.
    fn moods_of(&self, post: &str) -> Vec<MoodGroup> {
        let mut groups: Vec<MoodGroup> = Vec::new();
        for reaction in self.reactions.get(post).into_iter().flatten() {
            let post = reference(reaction);
            match groups.iter_mut().find(|g| g.emoji == reaction.mood) {
                Some(group) => group.posts.push(post),
                None => groups.push(MoodGroup {
                    emoji: reaction.mood.clone(),
                    posts: vec![post],
                }),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const ALICE: &str = "https://alice.example.com/social.org";
    const BOB: &str = "https://bob.example.com/social.org";

    fn post(feed: &str, id: &str, kind: PostKind, reply_to: Option<&str>) -> Post {
        Post {
            id: 0,
            profile_id: 0,
            feed_url: feed.into(),
            post_id: id.into(),
            content: String::new(),
            language: String::new(),
            tags: String::new(),
            client: String::new(),
            reply_to: reply_to.map(str::to_string),
            mood: String::new(),
            group: String::new(),
            include: None,
            poll_end: None,
            kind,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn reaction(feed: &str, id: &str, to: &str, emoji: &str) -> Post {
        let mut p = post(feed, id, PostKind::Reaction, Some(to));
        p.mood = emoji.into();
        p
    }

    fn r(feed: &str, id: &str) -> String {
        format!("{}#{}", feed, id)
    }

    #[test]
    fn test_children_newest_first_and_reactions_only_in_moods() {
        let root = r(ALICE, "T0");
        let posts = vec![
            post(ALICE, "T0", PostKind::Post, None),
            post(BOB, "T1", PostKind::Reply, Some(&root)),
            post(BOB, "T3", PostKind::Reply, Some(&root)),
            post(BOB, "T2", PostKind::Reply, Some(&root)),
            reaction(ALICE, "T4", &r(BOB, "T3"), "❤"),
            reaction(BOB, "T5", &r(BOB, "T3"), "❤"),
            reaction(BOB, "T6", &r(BOB, "T3"), "👍"),
            post(ALICE, "T7", PostKind::Reply, Some(&r(BOB, "T1"))),
        ];

        let tree = build_reply_tree(&PostRef::new(ALICE, "T0"), &posts, MAX_DEPTH);
        let order: Vec<&str> = tree.iter().map(|n| n.post.as_str()).collect();
        assert_eq!(order, vec![r(BOB, "T3"), r(BOB, "T2"), r(BOB, "T1")]);

        let newest = &tree[0];
        assert!(newest.children.is_empty());
        assert_eq!(
            newest.moods,
            vec![
                MoodGroup { emoji: "👍".into(), posts: vec![r(BOB, "T6")] },
                MoodGroup { emoji: "❤".into(), posts: vec![r(BOB, "T5"), r(ALICE, "T4")] },
            ]
        );
        assert_eq!(tree[2].children[0].post, r(ALICE, "T7"));
    }

    #[test]
    fn test_ancestor_chain_root_first() {
        let root = post(ALICE, "R", PostKind::Post, None);
        let a = post(BOB, "A", PostKind::Reply, Some(&r(ALICE, "R")));
        let b = post(ALICE, "B", PostKind::Reply, Some(&r(BOB, "A")));
        let c = post(BOB, "C", PostKind::Reply, Some(&r(ALICE, "B")));
        let posts = vec![root, a.clone(), b, c.clone()];

        assert_eq!(
            ancestor_chain(&c, &posts, MAX_DEPTH),
            vec![r(ALICE, "R"), r(BOB, "A"), r(ALICE, "B")]
        );
        assert_eq!(ancestor_chain(&a, &posts, MAX_DEPTH), vec![r(ALICE, "R")]);
        assert!(ancestor_chain(&posts[0], &posts, MAX_DEPTH).is_empty());
    }

    #[test]
    fn test_ancestor_chain_stops_at_dangling_reference() {
        let orphan = post(BOB, "A", PostKind::Reply, Some("https://gone.example.com/social.org#X"));
        let child = post(ALICE, "B", PostKind::Reply, Some(&r(BOB, "A")));
        let posts = vec![orphan, child.clone()];
        assert_eq!(
            ancestor_chain(&child, &posts, MAX_DEPTH),
            vec!["https://gone.example.com/social.org#X".to_string(), r(BOB, "A")]
        );
    }

    #[test]
    fn test_cycles_terminate() {
        let a = post(ALICE, "A", PostKind::Reply, Some(&r(BOB, "B")));
        let b = post(BOB, "B", PostKind::Reply, Some(&r(ALICE, "A")));
        let posts = vec![a.clone(), b];

        assert_eq!(ancestor_chain(&a, &posts, MAX_DEPTH), vec![r(BOB, "B")]);

        let tree = build_reply_tree(&PostRef::new(ALICE, "A"), &posts, MAX_DEPTH);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn test_depth_bound() {
        let mut posts = vec![post(ALICE, "0", PostKind::Post, None)];
        for i in 1..10 {
            posts.push(post(ALICE, &i.to_string(), PostKind::Reply, Some(&r(ALICE, &(i - 1).to_string()))));
        }
        let tree = build_reply_tree(&PostRef::new(ALICE, "0"), &posts, 2);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
        assert!(tree[0].children[0].children.is_empty());

        let last = posts.last().unwrap();
        assert_eq!(ancestor_chain(last, &posts, 3).len(), 3);
    }

    #[test]
    fn test_interactions_are_flat_and_sorted() {
        let target = r(ALICE, "T0");
        let mut boost = post(BOB, "T4", PostKind::Boost, None);
        boost.include = Some(target.clone());
        let vote = post(BOB, "T5", PostKind::PollVote, Some(&target));
        let posts = vec![
            post(ALICE, "T0", PostKind::Post, None),
            post(BOB, "T1", PostKind::Reply, Some(&target)),
            reaction(BOB, "T2", &target, "🎉"),
            post(BOB, "T3", PostKind::Reply, Some(&target)),
            boost,
            vote,
        ];

        let found = interactions(&PostRef::new(ALICE, "T0"), &posts);
        assert_eq!(found.replies, vec![r(BOB, "T3"), r(BOB, "T1")]);
        assert_eq!(
            found.reactions,
            vec![Reaction { post: r(BOB, "T2"), emoji: "🎉".into() }]
        );
        assert_eq!(found.boosts, vec![r(BOB, "T4")]);
    }

    #[test]
    fn test_profile_threads() {
        let posts = vec![
            post(ALICE, "T1", PostKind::Post, None),
            post(ALICE, "T2", PostKind::Post, None),
            post(BOB, "T3", PostKind::Reply, Some(&r(ALICE, "T1"))),
            post(BOB, "T4", PostKind::Post, None),
        ];
        let threads = profile_threads(ALICE, &posts, MAX_DEPTH);
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].root, r(ALICE, "T2"));
        assert_eq!(threads[1].replies[0].post, r(BOB, "T3"));
    }
}
