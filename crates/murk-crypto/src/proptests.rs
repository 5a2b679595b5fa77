use proptest::prelude::*;

use crate::{b64, envelope, hash, Identity};

proptest! {
    /// Identifier derivation is a pure function of the key bytes and
    /// sensitive to every byte of either key.
    #[test]
    fn prop_user_id_deterministic(kem in proptest::collection::vec(any::<u8>(), 1..64),
                                  sig in proptest::collection::vec(any::<u8>(), 1..64),
                                  flip in 0usize..64) {
        let id = hash::user_id_base64url(&kem, &sig);
        prop_assert_eq!(&id, &hash::user_id_base64url(&kem, &sig));

        let mut kem2 = kem.clone();
        let i = flip % kem2.len();
        kem2[i] ^= 0x01;
        prop_assert_ne!(&id, &hash::user_id_base64url(&kem2, &sig));
    }

    /// Base64url survives arbitrary bytes.
    #[test]
    fn prop_b64_round_trip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(b64::decode(&b64::encode(&data)).unwrap(), data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Seal then open recovers the message, timestamp, and sender for
    /// arbitrary plaintexts.
    #[test]
    fn prop_envelope_round_trip(message in proptest::collection::vec(any::<u8>(), 0..512),
                                timestamp in 0.0f64..4_000_000_000.0) {
        let sender = Identity::generate().unwrap();
        let recipient = Identity::generate().unwrap();

        let sealed = envelope::seal(
            &sender,
            "http://127.0.0.1:8000",
            recipient.user_id(),
            recipient.kem_public(),
            &message,
            timestamp,
            16,
            16,
        ).unwrap();
        let opened = envelope::open(&recipient, &sealed).unwrap();

        prop_assert_eq!(opened.message, message);
        prop_assert_eq!(opened.timestamp, timestamp);
        prop_assert_eq!(&opened.sender_id, sender.user_id());
    }

    /// Flipping any byte of the message ciphertext is rejected.
    #[test]
    fn prop_envelope_tamper_rejected(byte_index in 0usize..64, bit in 0u8..8) {
        let sender = Identity::generate().unwrap();
        let recipient = Identity::generate().unwrap();

        let mut sealed = envelope::seal(
            &sender,
            "http://127.0.0.1:8000",
            recipient.user_id(),
            recipient.kem_public(),
            b"property tamper probe",
            1_700_000_000.0,
            16,
            16,
        ).unwrap();

        let mut ct = b64::decode(&sealed.message_ciphertext).unwrap();
        let i = byte_index % ct.len();
        ct[i] ^= 1 << bit;
        sealed.message_ciphertext = b64::encode(&ct);

        prop_assert!(envelope::open(&recipient, &sealed).is_err());
    }
}
