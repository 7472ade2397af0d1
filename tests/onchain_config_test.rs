//! On-chain config codec scenarios, locally and across the plugin boundary

mod common;

use std::sync::Arc;

use anyhow::Result;
use num_bigint::BigInt;
use ocrloop_codec::{OnchainConfig, StandardOnchainConfigCodec, ValidationError, ONCHAIN_CONFIG_LENGTH};
use ocrloop_median::testing::StaticProvider;
use ocrloop_median::{register_provider, MedianProvider, MedianProviderClient, OnchainConfigCodec};
use ocrloop_plugin::PluginSet;
use proptest::prelude::*;

use common::connect;

fn word(value: i64) -> [u8; 32] {
    let mut word = if value < 0 { [0xff; 32] } else { [0; 32] };
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn hand_crafted(version: u8, min: i64, max: i64) -> Vec<u8> {
    let mut encoded = vec![0; 31];
    encoded.push(version);
    encoded.extend_from_slice(&word(min));
    encoded.extend_from_slice(&word(max));
    encoded
}

async fn remote_codec() -> Result<Arc<dyn OnchainConfigCodec>> {
    let (host, _plugin) = connect(PluginSet::new().with_plugin("provider", |server, _| {
        register_provider(server, Arc::new(StaticProvider::default()))
    }))
    .await;
    let dispensed = host.dispense("provider").await?;
    let conn = host.dial("provider", dispensed.id).await?;
    Ok(MedianProviderClient::new(conn).onchain_config_codec())
}

#[test]
fn test_min_max_round_trip() -> Result<()> {
    let config = OnchainConfig::new(100, 200);
    let encoded = StandardOnchainConfigCodec.encode(&config)?;
    assert_eq!(encoded.len(), ONCHAIN_CONFIG_LENGTH);
    assert_eq!(encoded, hand_crafted(1, 100, 200));
    assert_eq!(StandardOnchainConfigCodec.decode(&encoded)?, config);
    Ok(())
}

#[test]
fn test_hand_crafted_inverted_bounds_rejected() {
    let err = StandardOnchainConfigCodec.decode(&hand_crafted(1, 300, 100)).unwrap_err();
    assert!(matches!(err, ValidationError::MinGreaterThanMax { .. }), "{err}");
}

#[tokio::test]
async fn test_codec_across_plugin_boundary() -> Result<()> {
    let codec = remote_codec().await?;

    let config = OnchainConfig::new(-5, 1_000_000);
    let encoded = codec.encode(&config).await?;
    assert_eq!(encoded.len(), ONCHAIN_CONFIG_LENGTH);
    assert_eq!(codec.decode(&encoded).await?, config);

    for bad in [hand_crafted(2, 1, 2), hand_crafted(1, 300, 100), vec![0; 95]] {
        let err = codec.decode(&bad).await.unwrap_err();
        assert!(err.is_validation(), "{err}");
    }

    // encode leaves bound ordering to the caller
    let inverted = OnchainConfig::new(300, 100);
    assert_eq!(codec.encode(&inverted).await?, hand_crafted(1, 300, 100));
    Ok(())
}

proptest! {
    #[test]
    fn prop_ordered_bounds_round_trip(a in any::<i128>(), b in any::<i128>()) {
        let (min, max) = if a <= b { (a, b) } else { (b, a) };
        let config = OnchainConfig::new(BigInt::from(min), BigInt::from(max));
        let encoded = StandardOnchainConfigCodec.encode(&config).unwrap();
        prop_assert_eq!(encoded.len(), ONCHAIN_CONFIG_LENGTH);
        prop_assert_eq!(StandardOnchainConfigCodec.decode(&encoded).unwrap(), config);
    }
}
