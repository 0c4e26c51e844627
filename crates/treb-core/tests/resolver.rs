//! Tests for deployment identifier resolution.

mod support;

use support::{addr, deployment, labeled, store_with};
use treb_core::error::TrebError;
use treb_core::resolver::{DeploymentResolver, Resolution, ResolveFilter};

fn ids(resolution: &Resolution<'_>) -> Vec<String> {
    resolution
        .candidates()
        .into_iter()
        .map(|d| d.id.clone())
        .collect()
}

#[test]
fn test_resolves_full_id_and_respects_namespace_filter() {
    let store = store_with(vec![deployment("prod", 1, "Token", &addr("aaa"))]);
    let resolver = DeploymentResolver::new(&store);

    let found = resolver
        .resolve_one("prod/1/Token", &ResolveFilter::new())
        .expect("full id should resolve");
    assert_eq!(found.address, addr("aaa"));

    let staging = ResolveFilter::new().with_namespace("staging");
    assert_eq!(resolver.resolve("Token", &staging), Resolution::NotFound);
    assert!(matches!(
        resolver.resolve_one("Token", &staging),
        Err(TrebError::NotFound(_))
    ));
}

#[test]
fn test_address_lookup_ignores_case() {
    let store = store_with(vec![deployment("prod", 1, "Token", &addr("abcdef"))]);
    let resolver = DeploymentResolver::new(&store);

    let upper = addr("ABCDEF");
    let found = resolver
        .resolve_one(&upper, &ResolveFilter::new())
        .expect("address should resolve");
    assert_eq!(found.id, "prod/1/Token");

    assert_eq!(
        resolver.resolve(&addr("123456"), &ResolveFilter::new()),
        Resolution::NotFound
    );
}

#[test]
fn test_same_address_on_two_chains_is_ambiguous_without_chain_filter() {
    let store = store_with(vec![
        deployment("prod", 1, "Token", &addr("aa")),
        deployment("prod", 10, "Token", &addr("aa")),
    ]);
    let resolver = DeploymentResolver::new(&store);

    let resolution = resolver.resolve(&addr("aa"), &ResolveFilter::new());
    assert_eq!(ids(&resolution), vec!["prod/1/Token", "prod/10/Token"]);
    assert!(matches!(resolution, Resolution::Ambiguous(_)));

    let found = resolver
        .resolve_one(&addr("aa"), &ResolveFilter::new().with_chain(10))
        .expect("chain filter should narrow");
    assert_eq!(found.id, "prod/10/Token");
}

#[test]
fn test_contract_in_two_namespaces_is_ambiguous() {
    let store = store_with(vec![
        deployment("prod", 1, "Counter", &addr("01")),
        deployment("staging", 1, "Counter", &addr("02")),
    ]);
    let resolver = DeploymentResolver::new(&store);

    let err = resolver
        .resolve_one("Counter", &ResolveFilter::new())
        .expect_err("two namespaces should be ambiguous");
    match err {
        TrebError::AmbiguousMatch {
            identifier,
            candidates,
        } => {
            assert_eq!(identifier, "Counter");
            assert_eq!(candidates, vec!["prod/1/Counter", "staging/1/Counter"]);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }

    let found = resolver
        .resolve_one("staging/Counter", &ResolveFilter::new())
        .expect("namespace form should narrow");
    assert_eq!(found.address, addr("02"));

    let found = resolver
        .resolve_one("Counter", &ResolveFilter::new().with_namespace("prod"))
        .expect("namespace filter should narrow");
    assert_eq!(found.address, addr("01"));
}

#[test]
fn test_labels_select_a_single_deployment() {
    let store = store_with(vec![
        deployment("prod", 1, "Counter", &addr("01")),
        labeled("prod", 1, "Counter", "v2", &addr("02")),
    ]);
    let resolver = DeploymentResolver::new(&store);

    let found = resolver
        .resolve_one("Counter:v2", &ResolveFilter::new())
        .expect("label should select");
    assert_eq!(found.id, "prod/1/Counter:v2");

    let found = resolver
        .resolve_one("1/Counter:v2", &ResolveFilter::new())
        .expect("chain form with label should select");
    assert_eq!(found.address, addr("02"));

    assert!(matches!(
        resolver.resolve("Counter", &ResolveFilter::new()),
        Resolution::Ambiguous(_)
    ));
}

#[test]
fn test_falls_back_to_case_insensitive_substring() {
    let store = store_with(vec![
        deployment("prod", 1, "UniswapV3Factory", &addr("01")),
        deployment("prod", 1, "UniswapV3Router", &addr("02")),
        deployment("prod", 1, "Vault", &addr("03")),
    ]);
    let resolver = DeploymentResolver::new(&store);

    let found = resolver
        .resolve_one("v3factory", &ResolveFilter::new())
        .expect("substring should match");
    assert_eq!(found.contract_name, "UniswapV3Factory");

    assert_eq!(
        ids(&resolver.resolve("uniswap", &ResolveFilter::new())),
        vec!["prod/1/UniswapV3Factory", "prod/1/UniswapV3Router"]
    );
    assert_eq!(
        resolver.resolve("Missing", &ResolveFilter::new()),
        Resolution::NotFound
    );
    assert_eq!(resolver.resolve("  ", &ResolveFilter::new()), Resolution::NotFound);
}
