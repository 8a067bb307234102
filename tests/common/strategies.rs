use proptest::prelude::*;
use servicebus_transport::LogicalAddress;

/// Strategy for entity base names
pub fn base_address_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,40}"
}

/// Strategy for optional discriminators (instance ids)
pub fn discriminator_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z0-9]{1,8}")
}

/// Strategy for optional qualifiers (satellite queues)
pub fn qualifier_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop_oneof![
        Just("retries".to_string()),
        Just("timeouts".to_string()),
        Just("audit".to_string()),
        "[a-z]{1,12}",
    ])
}

pub fn logical_address_strategy() -> impl Strategy<Value = (String, Option<String>, Option<String>, LogicalAddress)> {
    (base_address_strategy(), discriminator_strategy(), qualifier_strategy()).prop_map(
        |(base, discriminator, qualifier)| {
            let mut address = LogicalAddress::new(base.clone());
            if let Some(discriminator) = &discriminator {
                address = address.with_discriminator(discriminator.clone());
            }
            if let Some(qualifier) = &qualifier {
                address = address.with_qualifier(qualifier.clone());
            }
            (base, discriminator, qualifier, address)
        },
    )
}
