pub mod command;
pub mod config;
pub mod event;
pub mod label;
pub mod owners;
pub mod permission;
pub mod platform;
pub mod robot;
pub mod staleness;

pub use command::{parse_comment, LgtmCommand};
pub use config::{BotConfig, ConfigError, Configuration, PathPattern};
pub use event::{BranchUpdateEvent, CommentEvent, Event, PrState, PullRequestContext};
pub use label::{lgtm_label_for, lgtm_labels_on, LABEL_LEN_LIMIT, LGTM_LABEL};
pub use owners::{decode_owners, normalize_login, OwnershipRecord};
pub use platform::{
    BranchRef, CachedFile, InMemoryPlatform, OwnersCache, PlatformClient, PrComment, RepoRole,
};
pub use robot::{Outcome, Robot};
