pub mod feed;
pub mod mention;
pub mod poll;
pub mod post;
pub mod profile;

pub use feed::Feed;
pub use mention::Mention;
pub use poll::{parse_poll_end, PollOption, PollVote};
pub use post::{Post, PostDraft, PostKind, PostRef};
pub use profile::{Contact, Follow, Profile, ProfileUpdate};
