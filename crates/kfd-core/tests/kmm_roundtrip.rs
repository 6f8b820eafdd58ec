//! Integration tests for the KMM codec.
//!
//! Every body kind is encoded through the public envelope API and parsed
//! back, using boundary values for the numeric fields.

use kfd_core::protocol::kmm::{
    unwrap_preamble, wrap_preamble, CapabilitiesResponse, ChangeRsiCommand, ChangeRsiResponse,
    InventoryCommand, InventoryResponse, KeyInfo, KeyItem, KeysetChangeover, KeysetDateTime,
    KeysetInfo, KeysetPair, KmmBody, KmmError, KmmMessage, LoadConfigCommand, LoadConfigResponse,
    Mfid90Opcode, Mfid90SessionControl, ModifyKeyCommand, NegativeAcknowledgment,
    RekeyAcknowledgment, ResponseKind, SessionControl, SessionOpcode, SourceDevice, MFID_MOTOROLA,
    MFID_STANDARD,
};
use kfd_core::{KeyStatus, Rsi, RsiItem};

fn roundtrip(body: KmmBody) -> KmmBody {
    let msg = KmmMessage::new(body);
    let bytes = msg.to_bytes().expect("encode must succeed");
    assert_eq!(
        u16::from_be_bytes([bytes[1], bytes[2]]) as usize,
        bytes.len() - 3,
        "length field must count everything after itself"
    );
    let decoded = KmmMessage::parse(&bytes).expect("decode must succeed");
    assert_eq!(decoded.response_kind, msg.response_kind);
    decoded.body
}

fn rsi(value: u32) -> Rsi {
    Rsi::new(value).expect("valid RSI")
}

#[test]
fn test_roundtrip_session_control_every_opcode() {
    for opcode in [
        SessionOpcode::ReadyRequest,
        SessionOpcode::ReadyGeneralMode,
        SessionOpcode::TransferDone,
        SessionOpcode::EndSession,
        SessionOpcode::EndSessionAck,
        SessionOpcode::Disconnect,
        SessionOpcode::DisconnectAck,
        SessionOpcode::BeginSession,
        SessionOpcode::BeginSessionAck,
    ] {
        let body = KmmBody::SessionControl(SessionControl {
            opcode,
            source: SourceDevice::Mr,
        });
        assert_eq!(roundtrip(body.clone()), body);
    }
}

#[test]
fn test_roundtrip_mfid90_session_control_through_preamble() {
    let body = KmmBody::Mfid90SessionControl(Mfid90SessionControl::from_kfd(Mfid90Opcode::BeginSessionAck));
    let kmm = KmmMessage::new(body.clone()).to_bytes().unwrap();

    let wrapped = wrap_preamble(MFID_MOTOROLA, &kmm);
    let (mfid, inner) = unwrap_preamble(&wrapped).unwrap();
    let decoded = KmmMessage::parse_with_mfid(inner, mfid).unwrap();

    assert_eq!(mfid, MFID_MOTOROLA);
    assert_eq!(decoded.body, body);
}

#[test]
fn test_mfid90_body_under_standard_mfid_is_rejected() {
    let kmm = KmmMessage::new(KmmBody::Mfid90SessionControl(Mfid90SessionControl::from_kfd(
        Mfid90Opcode::Connect,
    )))
    .to_bytes()
    .unwrap();

    assert!(matches!(
        KmmMessage::parse_with_mfid(&kmm, MFID_STANDARD),
        Err(KmmError::UnsupportedVersion { .. })
    ));
}

#[test]
fn test_roundtrip_inventory_commands() {
    for command in [
        InventoryCommand::ListActiveKsetIds,
        InventoryCommand::ListActiveKeys {
            marker: 0,
            max_keys: 78,
        },
        InventoryCommand::ListActiveKeys {
            marker: 0x00FF_FFFF,
            max_keys: 0xFFFF,
        },
        InventoryCommand::ListRsiItems,
        InventoryCommand::ListMnp,
        InventoryCommand::ListKmfRsi,
        InventoryCommand::ListKeysetTaggingInfo,
    ] {
        let body = KmmBody::InventoryCommand(command);
        assert_eq!(roundtrip(body.clone()), body);
    }
}

#[test]
fn test_roundtrip_inventory_responses() {
    let responses = vec![
        InventoryResponse::ListActiveKsetIds(vec![]),
        InventoryResponse::ListActiveKsetIds(vec![1, 0xFF]),
        InventoryResponse::ListActiveKeys {
            marker: 0x01_02_03,
            keys: vec![
                KeyInfo {
                    keyset_id: 1,
                    sln: 0,
                    algorithm_id: 0x84,
                    key_id: 0,
                },
                KeyInfo {
                    keyset_id: 0xFF,
                    sln: 0xFFFF,
                    algorithm_id: 0xAA,
                    key_id: 0xFFFF,
                },
            ],
        },
        InventoryResponse::ListRsiItems(vec![
            RsiItem {
                rsi: rsi(1),
                message_number: 0,
            },
            RsiItem {
                rsi: rsi(0x00FF_FFFF),
                message_number: 0xFFFF,
            },
        ]),
        InventoryResponse::ListMnp(0xFFFF),
        InventoryResponse::ListKmfRsi(rsi(0x0098_9680)),
        InventoryResponse::ListKeysetTaggingInfo(vec![KeysetInfo {
            keyset_id: 2,
            keyset_type: 1,
            reserved: None,
            activation: Some(KeysetDateTime {
                year: 2030,
                month: 6,
                day: 15,
                hour: 12,
                minute: 30,
                second: 0,
            }),
            name: "TRAFFIC".to_string(),
        }]),
    ];

    for response in responses {
        let body = KmmBody::InventoryResponse(response);
        assert_eq!(roundtrip(body.clone()), body);
    }
}

#[test]
fn test_roundtrip_modify_key_boundary_values() {
    let body = KmmBody::ModifyKeyCommand(ModifyKeyCommand {
        keyset_id: 0xFF,
        algorithm_id: 0x84,
        keys: vec![
            KeyItem {
                sln: 0,
                key_id: 0,
                is_kek: false,
                erase: false,
                key: vec![0x00; 32],
            },
            KeyItem {
                sln: 0xFFFF,
                key_id: 0xFFFF,
                is_kek: true,
                erase: true,
                key: vec![0xFF; 32],
            },
        ],
    });

    assert_eq!(roundtrip(body.clone()), body);
}

#[test]
fn test_roundtrip_acknowledgments() {
    let rekey = KmmBody::RekeyAcknowledgment(RekeyAcknowledgment {
        acked_message_id: 0x13,
        statuses: vec![
            KeyStatus {
                algorithm_id: 0x84,
                key_id: 1,
                status: 0,
            },
            KeyStatus {
                algorithm_id: 0x84,
                key_id: 0xFFFF,
                status: 0x08,
            },
        ],
    });
    let nak = KmmBody::NegativeAcknowledgment(NegativeAcknowledgment {
        acked_message_id: 0x13,
        message_number: 0xFFFF,
        status: 0x08,
    });

    assert_eq!(roundtrip(rekey.clone()), rekey);
    assert_eq!(roundtrip(nak.clone()), nak);
}

#[test]
fn test_roundtrip_empty_bodies() {
    for body in [
        KmmBody::ZeroizeCommand,
        KmmBody::ZeroizeResponse,
        KmmBody::CapabilitiesCommand,
    ] {
        assert_eq!(roundtrip(body.clone()), body);
    }
}

#[test]
fn test_roundtrip_changeover() {
    let pairs = vec![
        KeysetPair {
            superseded: 1,
            activated: 2,
        },
        KeysetPair {
            superseded: 0xFF,
            activated: 1,
        },
    ];
    let command = KmmBody::ChangeoverCommand(KeysetChangeover { pairs: pairs.clone() });
    let response = KmmBody::ChangeoverResponse(KeysetChangeover { pairs });

    assert_eq!(roundtrip(command.clone()), command);
    assert_eq!(roundtrip(response.clone()), response);
}

#[test]
fn test_roundtrip_change_rsi_and_load_config() {
    let bodies = vec![
        KmmBody::ChangeRsiCommand(ChangeRsiCommand {
            change_sequence: 1,
            rsi_old: rsi(0),
            rsi_new: rsi(0x00FF_FFFF),
            message_number: 0,
        }),
        KmmBody::ChangeRsiResponse(ChangeRsiResponse {
            change_sequence: 1,
            rsi_old: rsi(0x0012_3456),
            rsi_new: rsi(0x0065_4321),
            status: 0,
        }),
        KmmBody::LoadConfigCommand(LoadConfigCommand {
            kmf_rsi: rsi(0x0098_9680),
            mnp: 0xFFFF,
        }),
        KmmBody::LoadConfigResponse(LoadConfigResponse {
            kmf_rsi: rsi(0x0098_9680),
            mnp: 0,
            status: 0x01,
        }),
    ];

    for body in bodies {
        assert_eq!(roundtrip(body.clone()), body);
    }
}

#[test]
fn test_roundtrip_capabilities() {
    let body = KmmBody::CapabilitiesResponse(CapabilitiesResponse {
        algorithms: vec![0x81, 0x84, 0xAA],
        services: vec![0x01],
        message_ids: vec![0x0D, 0x13, 0x21],
    });

    assert_eq!(roundtrip(body.clone()), body);
}

#[test]
fn test_commands_request_immediate_response() {
    let msg = KmmMessage::new(KmmBody::InventoryCommand(InventoryCommand::ListMnp));
    assert_eq!(msg.response_kind, ResponseKind::Immediate);
}

#[test]
fn test_delayed_response_kind_roundtrips() {
    let msg = KmmMessage {
        response_kind: ResponseKind::Delayed,
        body: KmmBody::ZeroizeCommand,
    };
    let bytes = msg.to_bytes().unwrap();

    assert_eq!(bytes[3], 0x40);
    assert_eq!(KmmMessage::parse(&bytes).unwrap(), msg);
}

#[test]
fn test_unknown_inventory_type_inside_envelope() {
    let bytes = [0x0E, 0x00, 0x08, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x55];
    assert_eq!(
        KmmMessage::parse(&bytes),
        Err(KmmError::UnknownInventoryType(0x55))
    );
}
