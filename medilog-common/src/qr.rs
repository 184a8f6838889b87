//! QR identity tokens
//!
//! An asset's printed QR code carries a token embedding the clinic and asset
//! identifiers. Real-world scanners hand back full URLs, bare identifiers, or
//! prefixed strings; `decode` tolerates all three and only reports failure
//! when no plausible identifier segment exists. Decoding and lookup are kept
//! apart on purpose: an unreadable token is a scan problem, an identifier
//! that matches nothing is a data problem, and callers present the two
//! differently.

use crate::models::Asset;
use crate::uuid_utils;
use uuid::Uuid;

/// Scheme prefix used for freshly printed tokens
pub const TOKEN_SCHEME: &str = "medilog";

/// Longest identifier segment `decode` will accept
const MAX_IDENTIFIER_LEN: usize = 64;

/// Produce the stable, URL-safe token printed into an asset's QR code.
///
/// Reversible by [`decode`]: the asset identifier is the trailing segment.
pub fn encode(clinic_id: Uuid, asset_id: Uuid) -> String {
    format!("{TOKEN_SCHEME}://clinic/{clinic_id}/asset/{asset_id}")
}

/// Extract the asset identifier from scanned text.
///
/// Takes the trailing `/`- or `:`-separated segment, ignoring any query
/// string or fragment. Returns `None` when no plausible identifier segment
/// exists — distinct from an identifier that later matches no asset.
pub fn decode(raw: &str) -> Option<String> {
    let cut = raw.trim().split(['?', '#']).next().unwrap_or("");
    let candidate = cut.rsplit(['/', ':']).find(|seg| !seg.is_empty())?;

    if is_plausible_identifier(candidate) {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Look up a decoded identifier against the current in-memory asset list.
///
/// Exact identifier match only: no fuzzy matching, and because the list is
/// already scoped to one clinic, an identifier from another clinic's asset
/// can only come back as `None`.
pub fn resolve<'a>(asset_id: &str, assets: &'a [Asset]) -> Option<&'a Asset> {
    let parsed = uuid_utils::parse(asset_id).ok()?;
    assets.iter().find(|asset| asset.guid == parsed)
}

fn is_plausible_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= MAX_IDENTIFIER_LEN
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Asset, AssetStatus};
    use chrono::Utc;

    fn asset(guid: Uuid, clinic_id: Uuid) -> Asset {
        Asset {
            guid,
            clinic_id,
            name: "Ultrasound".to_string(),
            brand: "GE".to_string(),
            serial_number: "US-100".to_string(),
            location: None,
            next_service_date: None,
            status: AssetStatus::Active,
            service_provider: None,
            service_phone: None,
            service_email: None,
            notes: None,
            documents: Vec::new(),
            maintenance_history: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let clinic = Uuid::new_v4();
        let asset_id = Uuid::new_v4();
        let token = encode(clinic, asset_id);
        assert_eq!(decode(&token), Some(asset_id.to_string()));
    }

    #[test]
    fn test_decode_full_url() {
        assert_eq!(
            decode("https://x/asset/abc123"),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn test_decode_bare_identifier() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(decode(&id), Some(id.clone()));
    }

    #[test]
    fn test_decode_colon_composite() {
        assert_eq!(decode("clinic-7:asset-42"), Some("asset-42".to_string()));
    }

    #[test]
    fn test_decode_ignores_query_and_trailing_slash() {
        assert_eq!(
            decode("https://x/asset/abc123?source=print#top"),
            Some("abc123".to_string())
        );
        assert_eq!(decode("https://x/asset/abc123/"), Some("abc123".to_string()));
    }

    #[test]
    fn test_decode_failure_on_unparseable_text() {
        assert_eq!(decode("not a url"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode("   "), None);
        assert_eq!(decode("///"), None);
    }

    #[test]
    fn test_resolve_exact_match_only() {
        let clinic = Uuid::new_v4();
        let a = asset(Uuid::new_v4(), clinic);
        let b = asset(Uuid::new_v4(), clinic);
        let list = vec![a.clone(), b.clone()];

        let found = resolve(&a.guid.to_string(), &list).expect("present id resolves");
        assert_eq!(found.guid, a.guid);

        // Valid identifier, but absent from this clinic's list
        let foreign = Uuid::new_v4();
        assert!(resolve(&foreign.to_string(), &list).is_none());

        // Decodable but non-identifier text matches nothing
        assert!(resolve("abc123", &list).is_none());
    }

    #[test]
    fn test_scan_own_code_resolves_to_same_asset() {
        let clinic = Uuid::new_v4();
        let a = asset(Uuid::new_v4(), clinic);
        let list = vec![a.clone()];

        let token = encode(clinic, a.guid);
        let decoded = decode(&token).expect("own token decodes");
        let found = resolve(&decoded, &list).expect("own token resolves");
        assert_eq!(found.guid, a.guid);
    }
}
