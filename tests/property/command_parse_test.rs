// tests/property/command_parse_test.rs

//! Property-based tests for the text command parser.

use proptest::prelude::*;
use pubsub_bridge::core::{BridgeError, Command, CommandKind, ErrorKind};

fn publish_verb() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("publish"), Just("PUBLISH"), Just("Publish"), Just("pUbLiSh")]
}

fn subscribe_family() -> impl Strategy<Value = (&'static str, CommandKind)> {
    prop_oneof![
        Just(("subscribe", CommandKind::Subscribe)),
        Just(("PSUBSCRIBE", CommandKind::PSubscribe)),
        Just(("Unsubscribe", CommandKind::Unsubscribe)),
        Just(("punsubscribe", CommandKind::PUnsubscribe)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_publish_payload_is_the_unsplit_remainder(
        verb in publish_verb(),
        channel in "[a-zA-Z0-9._:*-]{1,32}",
        payload in "[!-~]([ -~]{0,200}[!-~])?"
    ) {
        let line = format!("{verb} {channel} {payload}");
        let command = Command::parse(line.as_bytes()).unwrap();
        prop_assert_eq!(command, Command::Publish { channel, payload });
    }

    #[test]
    fn test_subscribe_family_splits_on_spaces(
        (verb, kind) in subscribe_family(),
        channels in prop::collection::vec("[!-~]{1,16}", 1..10),
        gaps in prop::collection::vec(1usize..4, 10)
    ) {
        let mut line = verb.to_string();
        for (channel, gap) in channels.iter().zip(&gaps) {
            line.push_str(&" ".repeat(*gap));
            line.push_str(channel);
        }
        let command = Command::parse(line.as_bytes()).unwrap();
        prop_assert_eq!(command.kind(), kind);
        prop_assert_eq!(command.channels(), channels.as_slice());
    }

    #[test]
    fn test_newlines_behave_like_spaces(
        channels in prop::collection::vec("[a-z]{1,8}", 1..6)
    ) {
        let with_newlines = format!("subscribe\n{}\n", channels.join("\n"));
        let with_spaces = format!("subscribe {}", channels.join(" "));
        prop_assert_eq!(
            Command::parse(with_newlines.as_bytes()).unwrap(),
            Command::parse(with_spaces.as_bytes()).unwrap()
        );
    }

    #[test]
    fn test_arbitrary_input_never_panics(raw in prop::collection::vec(any::<u8>(), 0..256)) {
        match Command::parse(&raw) {
            Ok(command) => prop_assert!(!command.channels().is_empty()),
            Err(e) => prop_assert_eq!(e.kind(), ErrorKind::Parse),
        }
    }

    #[test]
    fn test_unknown_verbs_are_rejected(
        verb in "[a-z]{1,12}",
        rest in "[a-z]{1,12}"
    ) {
        prop_assume!(verb.parse::<CommandKind>().is_err());
        let line = format!("{verb} {rest}");
        prop_assert_eq!(
            Command::parse(line.as_bytes()),
            Err(BridgeError::UnknownVerb(verb))
        );
    }
}
