//! # Pipelines-as-Code Providers
//!
//! VCS integrations implementing [`pac_core::provider::Provider`].
//!
//! Each provider detects its own webhooks, turns them into
//! [`pac_core::Event`]s, validates their signatures and talks to the
//! forge API for file contents, access control, statuses and comments.
//!
//! | Provider | Name | Webhook header |
//! |----------|------|----------------|
//! | GitHub and GitHub Enterprise | `github` | `X-GitHub-Event` |
//! | Gitea and Forgejo | `gitea` | `X-Gitea-Event-Type` |
//! | GitLab | `gitlab` | `X-Gitlab-Event` |
//! | Bitbucket Cloud | `bitbucket-cloud` | `X-Event-Key` (`pullrequest:*`, `repo:push`) |
//! | Bitbucket Data Center | `bitbucket-datacenter` | `X-Event-Key` (`pr:*`, `repo:refs_changed`) |
//!
//! ## Usage
//!
//! ```rust
//! use pac_providers::ProviderRegistry;
//!
//! let registry = ProviderRegistry::with_defaults(None);
//! assert!(registry.get("gitlab").is_some());
//! ```

pub mod acl;
pub mod bitbucket_cloud;
pub mod bitbucket_datacenter;
pub mod client;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod registry;
pub mod signature;

pub use bitbucket_cloud::BitbucketCloudProvider;
pub use bitbucket_datacenter::BitbucketDataCenterProvider;
pub use gitea::GiteaProvider;
pub use github::{AppTokenSource, GitHubProvider};
pub use gitlab::GitLabProvider;
pub use registry::{ProviderRegistry, Routed};
