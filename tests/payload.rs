mod common;

use std::io::Read;

use common::{IV, content_key, sample_gcode};
use sealed_print::crypto::{
    ContentKey, CryptoError, PayloadDecryptor, PayloadFormat, seal_payload, sniff_payload,
};

#[test]
fn test_decrypt_recovers_plaintext_for_both_key_sizes() {
    let plaintext = sample_gcode(4);
    for key in [
        ContentKey::from_slice(&[0x07; 16]).unwrap(),
        ContentKey::from_slice(&[0x07; 32]).unwrap(),
    ] {
        let sealed = seal_payload(plaintext.as_bytes(), &key, &IV).unwrap();
        assert_eq!(sealed.len() % 16, 0);
        assert!(sealed.len() > plaintext.len());

        let mut artifact = PayloadDecryptor::decrypt(&sealed, &key, &IV).unwrap();
        assert_eq!(artifact.total_size(), plaintext.len() as u64);
        let mut text = String::new();
        artifact.read_to_string(&mut text).unwrap();
        assert_eq!(text, plaintext);
    }
}

#[test]
fn test_block_aligned_plaintext_gets_a_full_padding_block() {
    let plaintext = "G28\nG1 X1 Y1 Z1\n";
    assert_eq!(plaintext.len(), 16);
    let key = content_key();
    let sealed = seal_payload(plaintext.as_bytes(), &key, &IV).unwrap();
    assert_eq!(sealed.len(), 32);
    let artifact = PayloadDecryptor::decrypt(&sealed, &key, &IV).unwrap();
    assert_eq!(artifact.total_size(), 16);
}

#[test]
fn test_wrong_key_is_rejected() {
    let sealed = seal_payload(sample_gcode(2).as_bytes(), &content_key(), &IV).unwrap();
    let wrong = ContentKey::from_slice(&[0x22; 32]).unwrap();
    let err = PayloadDecryptor::decrypt(&sealed, &wrong, &IV).unwrap_err();
    assert!(matches!(err, CryptoError::DecryptFailed(_)));
}

#[test]
fn test_wrong_key_size_class_is_rejected() {
    let sealed = seal_payload(sample_gcode(2).as_bytes(), &content_key(), &IV).unwrap();
    let short = ContentKey::from_slice(&[0x11; 16]).unwrap();
    assert!(matches!(
        PayloadDecryptor::decrypt(&sealed, &short, &IV),
        Err(CryptoError::DecryptFailed(_))
    ));
}

#[test]
fn test_tampered_ciphertext_is_rejected() {
    let mut sealed = seal_payload(sample_gcode(2).as_bytes(), &content_key(), &IV).unwrap();
    sealed[0] ^= 0x80;
    assert!(matches!(
        PayloadDecryptor::decrypt(&sealed, &content_key(), &IV),
        Err(CryptoError::DecryptFailed(_))
    ));
}

#[test]
fn test_unaligned_and_empty_payloads_are_rejected() {
    let key = content_key();
    for payload in [Vec::new(), vec![0u8; 15], vec![0u8; 33]] {
        assert!(matches!(
            PayloadDecryptor::decrypt(&payload, &key, &IV),
            Err(CryptoError::DecryptFailed(_))
        ));
    }
}

#[test]
fn test_sniff_classifies_payloads() {
    let plaintext = sample_gcode(2);
    assert_eq!(sniff_payload(plaintext.as_bytes()), PayloadFormat::Plaintext);

    let sealed = seal_payload(plaintext.as_bytes(), &content_key(), &IV).unwrap();
    assert_eq!(sniff_payload(&sealed), PayloadFormat::Encrypted);

    assert_eq!(sniff_payload(&[]), PayloadFormat::Malformed);
    assert_eq!(sniff_payload(&sealed[..sealed.len() - 1]), PayloadFormat::Malformed);
}

#[test]
fn test_sniff_only_looks_at_the_head() {
    let mut payload = "G1 X1\n".repeat(1000).into_bytes();
    payload.extend_from_slice(&[0x00, 0xff, 0x01]);
    assert_eq!(sniff_payload(&payload), PayloadFormat::Plaintext);
}
