//! Property-based invariant tests for resource loading and settling.
//!
//! Verifies:
//! 1. Each distinct key is fetched at most once while pending.
//! 2. The all-settled signal fires exactly once per build, whatever the
//!    completion order and whichever loads fail.
//! 3. After settling, every tile is `Ready` or `Failed`, never `Pending`.
//! 4. `Ready` tiles hold exactly the handle their key resolved to.
//! 5. Completions arriving after a cache clear are discarded.

use std::collections::HashMap;
use std::rc::Rc;

use infigrid_core::config::{LayoutConfig, TileStyle};
use infigrid_core::geometry::GridLayout;
use infigrid_core::item::{GridItem, ImageSource};
use infigrid_core::resource_cache::{
    CachedResource, LoadError, LoadTicket, ResourceCache, SamplingPolicy,
};
use infigrid_core::tile_set::{ContentState, TileSet, TileWaiter};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Texture {
    key: String,
    sampled: bool,
}

impl CachedResource for Texture {
    fn configure_sampling(&mut self, _: SamplingPolicy) {
        self.sampled = true;
    }
}

// ── Strategy helpers ──────────────────────────────────────────────────

/// Items whose image keys are drawn from a small pool, so duplicates occur.
fn arb_items() -> impl Strategy<Value = Vec<GridItem>> {
    prop::collection::vec(0u8..12, 0..30).prop_map(|keys| {
        keys.into_iter()
            .enumerate()
            .map(|(i, k)| GridItem {
                title: format!("item {i}"),
                href: format!("/item/{i}"),
                image: ImageSource::Url(format!("/img/{k}.webp")),
                tags: vec![],
            })
            .collect()
    })
}

fn layout_for(n: usize) -> GridLayout {
    GridLayout::compute(n, &LayoutConfig::wide())
}

fn build(
    epoch: u64,
    items: &Rc<[GridItem]>,
    cache: &mut ResourceCache<Texture, TileWaiter>,
) -> (TileSet<Texture>, Vec<LoadTicket>, bool) {
    let (set, out) = TileSet::build(
        epoch,
        Rc::clone(items),
        layout_for(items.len()),
        TileStyle::default(),
        cache,
    );
    (set, out.tickets, out.all_settled)
}

// ═════════════════════════════════════════════════════════════════════════
// 1–4. Settling under arbitrary completion orders and failures
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn settles_exactly_once(
        items in arb_items(),
        order_seed in any::<u64>(),
        failures in prop::collection::vec(any::<bool>(), 12),
    ) {
        let items: Rc<[GridItem]> = items.into();
        let mut cache = ResourceCache::default();
        let (mut set, mut tickets, mut fired) = build(1, &items, &mut cache);

        let distinct: std::collections::HashSet<&str> =
            items.iter().map(|i| i.image.src()).collect();
        prop_assert_eq!(tickets.len(), distinct.len());

        // Deterministic shuffle driven by the seed.
        let mut s = order_seed | 1;
        for i in (1..tickets.len()).rev() {
            s ^= s << 13;
            s ^= s >> 7;
            s ^= s << 17;
            tickets.swap(i, (s % (i as u64 + 1)) as usize);
        }

        let mut fire_count = usize::from(fired);
        let mut resolved: HashMap<String, bool> = HashMap::new();
        for ticket in tickets {
            let key = ticket.key().to_owned();
            let slot: usize = key
                .trim_start_matches("/img/")
                .trim_end_matches(".webp")
                .parse()
                .unwrap_or(0);
            let fail = failures[slot % failures.len()];
            let result = if fail {
                Err(LoadError::Network(format!("{key}: 500")))
            } else {
                Ok(Texture { key: key.clone(), sampled: false })
            };
            resolved.insert(key, !fail);
            let settled = cache.complete(ticket, result).expect("fresh ticket");
            let progress = set.apply_settled(&settled);
            if progress.all_settled {
                fire_count += 1;
                fired = true;
            }
        }

        prop_assert!(fired);
        prop_assert_eq!(fire_count, 1, "all-settled fired {} times", fire_count);
        prop_assert!(set.gate().has_fired());

        for tile in set.tiles() {
            let key = items[tile.id.item.0 as usize].image.src();
            match &tile.content {
                ContentState::Pending => prop_assert!(false, "tile {:?} still pending", tile.id),
                ContentState::Ready(t) => {
                    prop_assert_eq!(&t.key, key);
                    prop_assert!(t.sampled, "sampling not configured before publish");
                    prop_assert_eq!(resolved.get(key), Some(&true));
                }
                ContentState::Failed => prop_assert_eq!(resolved.get(key), Some(&false)),
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Stale completions
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn completions_after_clear_are_discarded(items in arb_items()) {
        let items: Rc<[GridItem]> = items.into();
        let mut cache = ResourceCache::default();
        let (set, tickets, _) = build(1, &items, &mut cache);
        set.dispose();
        cache.clear();
        for ticket in tickets {
            let key = ticket.key().to_owned();
            let settled = cache.complete(ticket, Ok(Texture { key, sampled: false }));
            prop_assert!(settled.is_none());
        }
        prop_assert!(cache.is_empty());
        prop_assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn rebuild_while_pending_settles_new_build_once(items in arb_items()) {
        let items: Rc<[GridItem]> = items.into();
        let mut cache = ResourceCache::default();
        let (old, tickets, _) = build(1, &items, &mut cache);
        old.dispose();
        let (mut new, new_tickets, mut fired) = build(2, &items, &mut cache);
        // Pending entries are joined, not refetched.
        prop_assert!(new_tickets.is_empty());

        let mut fire_count = usize::from(fired);
        for ticket in tickets {
            let key = ticket.key().to_owned();
            let settled = cache
                .complete(ticket, Ok(Texture { key, sampled: false }))
                .expect("ticket still live");
            if new.apply_settled(&settled).all_settled {
                fire_count += 1;
                fired = true;
            }
        }
        prop_assert!(fired);
        prop_assert_eq!(fire_count, 1);
        prop_assert!(new.tiles().iter().all(|t| t.content.handle().is_some()));
    }
}
