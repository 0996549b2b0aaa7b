use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::Region;

/// Shared SDK configuration; an explicit region wins over the default chain.
pub async fn sdk_config(region: Option<String>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }
    loader.load().await
}
