//! Opaque pagination cursors.
//!
//! A token is base64 of `{"o": offset, "f": filter-fingerprint}`. The
//! fingerprint binds the token to the filter it was minted under; a token
//! replayed with a different filter is rejected. Offsets mean inserts that
//! land before the cursor can be skipped until a fresh scan; a documented
//! property, not a bug to compensate for.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

#[derive(Serialize, Deserialize)]
struct Token {
    o: usize,
    f: String,
}

pub fn fingerprint<F: Serialize>(filter: &F) -> String {
    let json = serde_json::to_vec(filter).unwrap_or_default();
    hex::encode(Sha256::digest(&json))[..16].to_string()
}

pub fn encode_token(offset: usize, fingerprint: &str) -> String {
    let token = Token {
        o: offset,
        f: fingerprint.to_string(),
    };
    STANDARD.encode(serde_json::to_vec(&token).expect("token serialization"))
}

/// Decode a token minted by [`encode_token`], validating it against the
/// fingerprint of the filter on the current request.
pub fn decode_token(token: &str, fingerprint: &str) -> Result<usize> {
    let bytes = STANDARD
        .decode(token)
        .map_err(|_| StoreError::InvalidArgument("invalid pagination token".into()))?;
    let token: Token = serde_json::from_slice(&bytes)
        .map_err(|_| StoreError::InvalidArgument("invalid pagination token".into()))?;
    if token.f != fingerprint {
        return Err(StoreError::InvalidArgument(
            "pagination token does not match the request filters".into(),
        ));
    }
    Ok(token.o)
}

/// Slice a fully sorted result set into one page. The caller sorts; this
/// only applies offset/limit and mints the continuation token.
pub fn paginate<T, F: Serialize>(
    items: Vec<T>,
    filter: &F,
    limit: usize,
    next_token: Option<&str>,
) -> Result<crate::filter::Page<T>> {
    let fp = fingerprint(filter);
    let offset = match next_token {
        Some(token) => decode_token(token, &fp)?,
        None => 0,
    };
    let total = items.len();
    let page: Vec<T> = items.into_iter().skip(offset).take(limit).collect();
    let consumed = offset + page.len();
    let next = (consumed < total).then(|| encode_token(consumed, &fp));
    Ok(crate::filter::Page {
        items: page,
        next_token: next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{NoFilter, TaskFilter};

    #[test]
    fn test_token_round_trip() {
        let fp = fingerprint(&NoFilter {});
        let token = encode_token(42, &fp);
        assert_eq!(decode_token(&token, &fp).unwrap(), 42);
    }

    #[test]
    fn test_token_rejects_filter_change() {
        let a = fingerprint(&TaskFilter {
            cluster_arn: "arn:a".into(),
            ..Default::default()
        });
        let b = fingerprint(&TaskFilter {
            cluster_arn: "arn:b".into(),
            ..Default::default()
        });
        assert_ne!(a, b);
        let token = encode_token(5, &a);
        assert!(matches!(
            decode_token(&token, &b),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_paginate_chains_to_exhaustion() {
        let filter = NoFilter {};
        let items: Vec<i32> = (0..12).collect();

        let p1 = paginate(items.clone(), &filter, 5, None).unwrap();
        assert_eq!(p1.items, vec![0, 1, 2, 3, 4]);
        let t1 = p1.next_token.expect("page 1 truncated");

        let p2 = paginate(items.clone(), &filter, 5, Some(&t1)).unwrap();
        assert_eq!(p2.items, vec![5, 6, 7, 8, 9]);
        let t2 = p2.next_token.expect("page 2 truncated");

        let p3 = paginate(items, &filter, 5, Some(&t2)).unwrap();
        assert_eq!(p3.items, vec![10, 11]);
        assert!(p3.next_token.is_none());
    }

    #[test]
    fn test_garbage_token_is_invalid_argument() {
        let fp = fingerprint(&NoFilter {});
        assert!(matches!(
            decode_token("not-base64!!", &fp),
            Err(StoreError::InvalidArgument(_))
        ));
    }
}
