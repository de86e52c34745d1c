//! Images and leftover containers created by tuprwre.

use chrono::Local;
use tracing::debug;
use uuid::Uuid;

use super::engine::{ContainerRecord, Engine, ImageRecord};
use super::error::{Result, SandboxError};
use super::session::Sandbox;

pub const NAME_PREFIX: &str = "tuprwre-";

/// States of containers that are no longer running.
const STOPPED_STATES: [&str; 3] = ["exited", "dead", "created"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuprwreImage {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub size: i64,
    /// Unix seconds.
    pub created: i64,
}

impl TuprwreImage {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuprwreContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
}

/// `tuprwre-20240131-235959-1a2b3c4d`
pub fn generate_image_name() -> String {
    format!(
        "{}{}-{}",
        NAME_PREFIX,
        Local::now().format("%Y%m%d-%H%M%S"),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Split `repo:tag` on the last colon. Dangling `<none>:<none>` entries and
/// references without a tag are rejected.
pub fn split_repo_tag(repo_tag: &str) -> Option<(&str, &str)> {
    if repo_tag.is_empty() || repo_tag == "<none>:<none>" {
        return None;
    }
    let idx = repo_tag.rfind(':')?;
    if idx == 0 || idx >= repo_tag.len() - 1 {
        return None;
    }
    Some((&repo_tag[..idx], &repo_tag[idx + 1..]))
}

/// Keep images with a `tuprwre-` repository, newest first.
pub fn tuprwre_images(records: Vec<ImageRecord>) -> Vec<TuprwreImage> {
    let mut images: Vec<TuprwreImage> = records
        .into_iter()
        .filter_map(|record| {
            let (repository, tag) = record
                .repo_tags
                .iter()
                .filter_map(|rt| split_repo_tag(rt))
                .find(|(repo, _)| repo.starts_with(NAME_PREFIX))?;
            Some(TuprwreImage {
                repository: repository.to_string(),
                tag: tag.to_string(),
                id: record.id,
                size: record.size,
                created: record.created,
            })
        })
        .collect();
    images.sort_by(|a, b| b.created.cmp(&a.created));
    images
}

/// Keep stopped containers whose name or image carries the `tuprwre-`
/// prefix.
pub fn stopped_tuprwre_containers(records: Vec<ContainerRecord>) -> Vec<TuprwreContainer> {
    records
        .into_iter()
        .filter(|c| STOPPED_STATES.contains(&c.state.as_str()))
        .filter_map(|c| {
            let names: Vec<&str> = c.names.iter().map(|n| n.trim_start_matches('/')).collect();
            let name = match names.iter().find(|n| n.starts_with(NAME_PREFIX)) {
                Some(name) => name.to_string(),
                None if c.image.starts_with(NAME_PREFIX) => match names.first() {
                    Some(first) if !first.is_empty() => first.to_string(),
                    _ => c.id[..c.id.len().min(12)].to_string(),
                },
                None => return None,
            };
            Some(TuprwreContainer {
                name,
                id: c.id,
                image: c.image,
                state: c.state,
            })
        })
        .collect()
}

impl<E: Engine> Sandbox<E> {
    pub async fn list_tuprwre_images(&self) -> Result<Vec<TuprwreImage>> {
        let records = self
            .engine()
            .list_images()
            .await
            .map_err(|e| SandboxError::engine("failed to list images", e))?;
        let images = tuprwre_images(records);
        debug!(count = images.len(), "registry:images listed");
        Ok(images)
    }

    pub async fn list_stopped_containers(&self) -> Result<Vec<TuprwreContainer>> {
        let records = self
            .engine()
            .list_containers()
            .await
            .map_err(|e| SandboxError::engine("failed to list containers", e))?;
        Ok(stopped_tuprwre_containers(records))
    }

    /// Remove an image and its untagged parents.
    pub async fn remove_image(&self, image: &str) -> Result<()> {
        self.engine()
            .remove_image(image)
            .await
            .map_err(|e| SandboxError::engine(format!("failed to remove image {}", image), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::testing::{FakeEngine, Script};

    fn image(id: &str, tags: &[&str], created: i64) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            repo_tags: tags.iter().map(|t| t.to_string()).collect(),
            size: 1024,
            created,
        }
    }

    fn container(id: &str, names: &[&str], image: &str, state: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            image: image.to_string(),
            state: state.to_string(),
        }
    }

    #[test]
    fn test_generate_image_name_shape() {
        let name = generate_image_name();
        let rest = name.strip_prefix("tuprwre-").unwrap();
        let parts: Vec<&str> = rest.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_split_repo_tag() {
        assert_eq!(split_repo_tag("tuprwre-x:latest"), Some(("tuprwre-x", "latest")));
        assert_eq!(
            split_repo_tag("localhost:5000/tuprwre-x:v1"),
            Some(("localhost:5000/tuprwre-x", "v1"))
        );
        assert_eq!(split_repo_tag("<none>:<none>"), None);
        assert_eq!(split_repo_tag(""), None);
        assert_eq!(split_repo_tag("notag"), None);
        assert_eq!(split_repo_tag(":latest"), None);
        assert_eq!(split_repo_tag("repo:"), None);
    }

    #[test]
    fn test_tuprwre_images_filtered_and_sorted() {
        let images = tuprwre_images(vec![
            image("sha256:old", &["tuprwre-20240101-000000-aaaaaaaa:latest"], 100),
            image("sha256:ubuntu", &["ubuntu:22.04"], 300),
            image("sha256:dangling", &["<none>:<none>"], 400),
            image("sha256:new", &["other:1", "tuprwre-20240202-000000-bbbbbbbb:latest"], 200),
        ]);

        let ids: Vec<&str> = images.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["sha256:new", "sha256:old"]);
        assert_eq!(images[0].reference(), "tuprwre-20240202-000000-bbbbbbbb:latest");
    }

    #[test]
    fn test_stopped_containers_by_name_or_image() {
        let containers = stopped_tuprwre_containers(vec![
            container("aaaaaaaaaaaaaaaa", &["/tuprwre-1234abcd"], "ubuntu:22.04", "exited"),
            container("bbbbbbbbbbbbbbbb", &["/funny_name"], "tuprwre-20240101-000000-x", "dead"),
            container("cccccccccccccccc", &[], "tuprwre-20240101-000000-x", "created"),
            container("dddddddddddddddd", &["/tuprwre-running"], "ubuntu:22.04", "running"),
            container("eeeeeeeeeeeeeeee", &["/unrelated"], "ubuntu:22.04", "exited"),
        ]);

        let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tuprwre-1234abcd", "funny_name", "cccccccccccc"]);
    }

    #[tokio::test]
    async fn test_list_through_engine() {
        let engine = FakeEngine::new(Script::exit(0))
            .with_images(vec![image("sha256:a", &["tuprwre-a:latest"], 1)])
            .with_containers(vec![container("c1", &["/tuprwre-c1"], "x", "exited")]);
        let sandbox = Sandbox::new(engine.clone());

        assert_eq!(sandbox.list_tuprwre_images().await.unwrap().len(), 1);
        assert_eq!(sandbox.list_stopped_containers().await.unwrap().len(), 1);

        sandbox.remove_image("sha256:a").await.unwrap();
        assert_eq!(engine.removed_images(), vec!["sha256:a"]);
    }
}
