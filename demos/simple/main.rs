use std::collections::HashMap;

use optimizely::{ClientConfig, DecideOption, DecisionEvent, ForcedDecisionKey, UserContext};

pub fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/data/datafile.json".to_owned());
    let datafile = std::fs::read(&path).unwrap();

    let mut config = ClientConfig::from_sdk_key("demo");
    config.decision_logger(|event: DecisionEvent| {
        println!("Decision event: {}", serde_json::to_string(&event).unwrap());
    });
    let client = config.to_client();

    // Until a datafile is loaded, all decisions fail with Error::NotReady.
    client.update_datafile(&datafile).unwrap();

    let mut user = UserContext::new("alice", HashMap::new());
    user.set_attribute("country", "US");

    let decision = client
        .decide(&user, "checkout", &[DecideOption::IncludeReasons])
        .unwrap();
    println!("Decision: {:#?}", decision);

    // Forced decisions take precedence over targeting and bucketing.
    user.set_forced_decision(ForcedDecisionKey::flag("checkout"), "treatment")
        .unwrap();
    let decision = client.decide(&user, "checkout", &[]).unwrap();
    println!(
        "Forced variation: {:?}, enabled: {}",
        decision.variation_key, decision.enabled
    );
}
