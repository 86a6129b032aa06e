// src/vibe.rs
//! "Live Vibe Check" aggregation over the published set.
//!
//! The policy is explicit configuration: `latest` mirrors a single-article readout,
//! `mean` and `max` aggregate across every published entry.

use serde::{Deserialize, Serialize};

use crate::model::{RankedEntry, Vibe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VibePolicy {
    /// Vibe of the most recently published entry.
    Latest,
    /// Component-wise mean.
    #[default]
    Mean,
    /// Component-wise maximum.
    Max,
}

#[derive(Debug, Clone, Serialize)]
pub struct VibeSummary {
    pub policy: VibePolicy,
    pub sample_size: usize,
    pub vibe: Vibe,
}

pub fn aggregate(policy: VibePolicy, published: &[RankedEntry]) -> VibeSummary {
    let vibes = published.iter().filter(|e| e.article.is_published());
    let mut n = 0usize;
    let vibe = match policy {
        VibePolicy::Latest => {
            // ties on publish time resolve to the most recently analyzed one
            let latest = vibes
                .inspect(|_| n += 1)
                .max_by_key(|e| (e.article.published_at, e.article.analyzed_at));
            latest.map(|e| e.article.vibe).unwrap_or_default()
        }
        VibePolicy::Mean => {
            let mut acc = (0.0f64, 0.0f64, 0.0f64);
            for e in vibes {
                n += 1;
                acc.0 += e.article.vibe.excitement as f64;
                acc.1 += e.article.vibe.shock as f64;
                acc.2 += e.article.vibe.sadness as f64;
            }
            if n == 0 {
                Vibe::default()
            } else {
                let d = n as f64;
                Vibe::new((acc.0 / d) as f32, (acc.1 / d) as f32, (acc.2 / d) as f32)
            }
        }
        VibePolicy::Max => vibes.fold(Vibe::default(), |m, e| {
            n += 1;
            Vibe {
                excitement: m.excitement.max(e.article.vibe.excitement),
                shock: m.shock.max(e.article.vibe.shock),
                sadness: m.sadness.max(e.article.vibe.sadness),
            }
        }),
    };

    VibeSummary {
        policy,
        sample_size: n,
        vibe,
    }
}
