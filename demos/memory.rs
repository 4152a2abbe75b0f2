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


use snapcache::{Cache, CacheBuilder};

fn main() {
    let cache: Cache<String, String> = CacheBuilder::new().build().unwrap();

    let mut ticket = cache.begin_write().unwrap();
    ticket.set("hello".to_string(), "world".to_string());
    ticket.commit().unwrap();

    let snapshot = cache.open_snapshot();

    let mut ticket = cache.begin_write().unwrap();
    ticket.remove("hello".to_string());
    ticket.commit().unwrap();

    // The snapshot keeps reading the generation it was opened at.
    let e = snapshot.get("hello").unwrap();
    assert_eq!(e.value(), "world");
    assert!(cache.open_snapshot().get("hello").is_none());
}
