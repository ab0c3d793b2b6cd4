//! Repository operations for registry client
//!
//! Implements Docker Registry v2 repository-level operations:
//! - Catalog search (GET /v2/_catalog, filtered client-side)
//! - Tag listing with optional digests and auto-pagination (GET /v2/{name}/tags/list)

use crate::error::{RegistryError, Result, ResultExt};
use crate::logging::Logger;
use crate::registry::client::{RegistryClient, RegistryRequest};
use crate::registry::operations::manifest_operations::{LookupMethod, ManifestOperations};
use crate::registry::pagination::Paginator;
use futures::TryStreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use url::form_urlencoded;

/// Options for [`RepositoryOperations::list_tags`]
#[derive(Debug, Clone, Default)]
pub struct TagQuery {
    /// Page size (`n`)
    pub count: Option<u32>,
    /// Start after this cursor
    pub last: Option<String>,
    /// Resolve each tag to its manifest digest
    pub with_hashes: bool,
    /// Follow cursors until the listing is exhausted
    pub auto_paginate: bool,
    /// Stop auto-pagination after this many pages
    pub max_pages: Option<usize>,
}

/// One tag listing, or the union of several when auto-paginating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPage {
    pub name: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
    /// Cursor of the next page; `None` once the listing is exhausted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    name: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct RepositoryOperations {
    client: RegistryClient,
    manifests: ManifestOperations,
    output: Logger,
}

impl RepositoryOperations {
    pub fn new(client: RegistryClient, manifests: ManifestOperations) -> Self {
        let output = client.logger().clone();
        Self {
            client,
            manifests,
            output,
        }
    }

    /// Repository names from every catalog page, filtered by the regular
    /// expression `query` unless it is empty
    pub async fn search(&self, query: &str) -> Result<Vec<String>> {
        let pattern = if query.is_empty() {
            None
        } else {
            Some(Regex::new(query)?)
        };

        let paginator = Paginator::new(&self.client);
        let mut pages = std::pin::pin!(paginator.pages("/v2/_catalog"));
        let mut repositories = Vec::new();

        while let Some(page) = pages.try_next().await.context("catalog")? {
            let catalog: Catalog = page.json()?;
            repositories.extend(
                catalog
                    .repositories
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|name| pattern.as_ref().is_none_or(|p| p.is_match(name))),
            );
        }

        self.output
            .verbose(&format!("Catalog search '{}' matched {} repositories", query, repositories.len()));
        Ok(repositories)
    }

    /// List tags of `repository`.
    ///
    /// With `auto_paginate` the pages are merged: tags keep first-seen order
    /// without duplicates and hash maps are combined.
    pub async fn list_tags(&self, repository: &str, query: &TagQuery) -> Result<TagPage> {
        let mut method = LookupMethod::Head;
        let mut result = self
            .fetch_tag_page(repository, query, query.last.as_deref(), &mut method)
            .await?;

        let mut seen = HashSet::new();
        result.tags.retain(|tag| seen.insert(tag.clone()));
        if !query.auto_paginate {
            return Ok(result);
        }

        let mut pages = 1usize;
        while let Some(cursor) = result.last.take() {
            if query.max_pages.is_some_and(|max| pages >= max) {
                self.output.warning(&format!(
                    "Stopping tag listing of {} after {} pages",
                    repository, pages
                ));
                result.last = Some(cursor);
                break;
            }

            let next = self
                .fetch_tag_page(repository, query, Some(&cursor), &mut method)
                .await?;
            for tag in next.tags {
                if seen.insert(tag.clone()) {
                    result.tags.push(tag);
                }
            }
            if let (Some(hashes), Some(more)) = (result.hashes.as_mut(), next.hashes) {
                hashes.extend(more);
            }
            result.last = next.last;
            pages += 1;
        }

        self.output.detail(&format!(
            "Listed {} tags of {} across {} pages",
            result.tags.len(),
            repository,
            pages
        ));
        Ok(result)
    }

    async fn fetch_tag_page(
        &self,
        repository: &str,
        query: &TagQuery,
        last: Option<&str>,
        method: &mut LookupMethod,
    ) -> Result<TagPage> {
        let path = tags_path(repository, query.count, last);
        let response = self
            .client
            .send(RegistryRequest::get(path))
            .await
            .context(repository)?;

        let cursor = Paginator::new(&self.client).cursor(&response.headers);
        let body = response.bytes().await?;
        let list: TagList = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::MalformedResponse(format!("{}: invalid tag list: {}", repository, e)))?;
        let tags = list.tags.unwrap_or_default();

        let hashes = if query.with_hashes {
            let mut hashes = BTreeMap::new();
            for tag in &tags {
                let head = self.manifests.lookup(repository, tag, method).await?;
                hashes.insert(tag.clone(), head.digest);
            }
            Some(hashes)
        } else {
            None
        };

        Ok(TagPage {
            name: list.name,
            tags,
            hashes,
            last: cursor,
        })
    }
}

fn tags_path(repository: &str, count: Option<u32>, last: Option<&str>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(last) = last.filter(|l| !l.is_empty()) {
        query.append_pair("last", last);
    }
    if let Some(count) = count {
        query.append_pair("n", &count.to_string());
    }
    let query = query.finish();

    if query.is_empty() {
        format!("/v2/{}/tags/list", repository)
    } else {
        format!("/v2/{}/tags/list?{}", repository, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_path() {
        assert_eq!(tags_path("app", None, None), "/v2/app/tags/list");
        assert_eq!(tags_path("app", Some(50), None), "/v2/app/tags/list?n=50");
        assert_eq!(
            tags_path("app", Some(2), Some("v1.0")),
            "/v2/app/tags/list?last=v1.0&n=2"
        );
        assert_eq!(tags_path("app", None, Some("")), "/v2/app/tags/list");
    }

    #[test]
    fn test_tag_page_serialization_skips_empty_fields() {
        let page = TagPage {
            name: "app".to_string(),
            tags: vec!["latest".to_string()],
            hashes: None,
            last: None,
        };
        assert_eq!(
            serde_json::to_string(&page).unwrap(),
            r#"{"name":"app","tags":["latest"]}"#
        );
    }

    #[test]
    fn test_tag_list_tolerates_null_tags() {
        let list: TagList = serde_json::from_str(r#"{"name": "app", "tags": null}"#).unwrap();
        assert!(list.tags.is_none());
    }
}
