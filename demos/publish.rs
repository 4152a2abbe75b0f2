// Copyright 2026 snapcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! A content tree published by an editor while requests render pages from snapshots.
//!
//! Moving a subtree rewrites the route of every page in it within one commit, so a request never sees a page
//! whose route disagrees with its parent.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use snapcache::{Cache, CacheBuilder, PrunePolicy, Snapshot};

#[derive(Debug, Clone)]
struct Page {
    parent: Option<u32>,
    name: String,
    route: String,
}

#[derive(Debug)]
struct TemplateError(u32);

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "template of page {} is missing", self.0)
    }
}

impl std::error::Error for TemplateError {}

const ROOT: u32 = 1;
const SECTIONS: u32 = 4;
const ARTICLES: u32 = 16;

fn article(section: u32, i: u32) -> u32 {
    100 * section + i
}

fn render(snapshot: &Snapshot<u32, Page>, id: u32) -> Option<String> {
    let page = snapshot.get(&id)?;
    if let Some(parent) = page.parent {
        let parent = snapshot.get(&parent)?;
        assert_eq!(page.route, format!("{}{}/", parent.route, page.name));
    }
    Some(format!("<h1>{}</h1> at {}", page.name, page.route))
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();

    let policy: PrunePolicy = serde_json::from_str(r#"{ "Lagged": { "min_generation_delta": 4 } }"#)?;
    let cache: Cache<u32, Page> = CacheBuilder::new()
        .with_name("content")
        .with_prune_policy(policy)
        .build()?;

    let mut ticket = cache.begin_write()?;
    ticket.set(
        ROOT,
        Page {
            parent: None,
            name: "home".to_string(),
            route: "/".to_string(),
        },
    );
    for section in 1..=SECTIONS {
        let route = format!("/section-{section}/");
        for i in 0..ARTICLES {
            ticket.set(
                article(section, i),
                Page {
                    parent: Some(section),
                    name: format!("article-{i}"),
                    route: format!("{route}article-{i}/"),
                },
            );
        }
        ticket.set(
            section,
            Page {
                parent: Some(ROOT),
                name: format!("section-{section}"),
                route,
            },
        );
    }
    ticket.commit()?;

    let stop = Arc::new(AtomicBool::new(false));
    let requests = (0..4)
        .map(|worker| {
            let cache = cache.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut rendered = 0;
                while !stop.load(Ordering::Relaxed) {
                    // One snapshot per request.
                    let snapshot = cache.open_snapshot();
                    for section in 1..=SECTIONS {
                        for i in 0..ARTICLES {
                            if render(&snapshot, article(section, i)).is_some() {
                                rendered += 1;
                            }
                        }
                    }
                }
                tracing::info!(worker, rendered, "requests done");
            })
        })
        .collect::<Vec<_>>();

    for round in 0..200u32 {
        let section = round % SECTIONS + 1;
        let name = format!("section-{section}-v{round}");
        let route = format!("/{name}/");

        let mut ticket = cache.begin_write()?;
        for i in 0..ARTICLES {
            ticket.set(
                article(section, i),
                Page {
                    parent: Some(section),
                    name: format!("article-{i}"),
                    route: format!("{route}article-{i}/"),
                },
            );
        }
        ticket.set(
            section,
            Page {
                parent: Some(ROOT),
                name,
                route,
            },
        );
        if round % 50 == 49 {
            // A page that fails to build poisons the whole batch.
            ticket.set_with(article(section, 0), || Err(TemplateError(article(section, 0))));
        }
        match ticket.commit() {
            Ok(generation) => tracing::debug!(generation, section, "published"),
            Err(e) => tracing::warn!("publish rejected: {e}"),
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    stop.store(true, Ordering::Relaxed);
    for request in requests {
        request.join().map_err(|_| anyhow::anyhow!("request worker panicked"))?;
    }

    let report = cache.prune();
    println!("{report:?}");
    println!("{:?}", cache.statistics());
    Ok(())
}
