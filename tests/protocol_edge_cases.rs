// Protocol codec edge cases: malformed input, boundary conditions, and the
// exact wire forms the codec must produce.

use bytes::Bytes;
use socksrelay::protocol::*;
use socksrelay::SocksError;
use std::io::Cursor;

// Helper to create a mock stream for testing
struct MockStream {
    read_buf: Cursor<Vec<u8>>,
    write_buf: Vec<u8>,
}

impl MockStream {
    fn new(data: Vec<u8>) -> Self {
        Self {
            read_buf: Cursor::new(data),
            write_buf: Vec::new(),
        }
    }
}

impl tokio::io::AsyncRead for MockStream {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let inner = &mut self.read_buf;
        std::pin::Pin::new(inner).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for MockStream {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        self.write_buf.extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}

// ---------------------------------------------------------------------------
// Greeting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn greeting_round_trip() {
    let greeting = ClientGreeting {
        methods: vec![AuthMethod::NoAuth, AuthMethod::UserPass],
    };

    let mut stream = MockStream::new(encode_client_greeting(&greeting));
    let decoded = parse_client_greeting(&mut stream).await.unwrap();
    assert_eq!(decoded, greeting);
}

#[tokio::test]
async fn greeting_max_methods() {
    let mut data = vec![0x05, 255u8];
    for i in 0..255 {
        data.push(i);
    }

    let mut stream = MockStream::new(data);
    let greeting = parse_client_greeting(&mut stream).await.unwrap();
    assert_eq!(greeting.methods.len(), 255);
}

#[tokio::test]
async fn greeting_rejects_wrong_version() {
    let mut stream = MockStream::new(vec![0x04, 0x01, 0x00]);
    assert!(matches!(
        parse_client_greeting(&mut stream).await,
        Err(SocksError::SocksVersion(0x04))
    ));
}

#[tokio::test]
async fn greeting_rejects_zero_methods() {
    let mut stream = MockStream::new(vec![0x05, 0x00]);
    assert!(matches!(
        parse_client_greeting(&mut stream).await,
        Err(SocksError::BadRequest)
    ));
}

#[tokio::test]
async fn greeting_incomplete_method_list() {
    // nmethods says 5, stream ends early
    let mut stream = MockStream::new(vec![0x05, 0x05, 0x00]);
    assert!(matches!(
        parse_client_greeting(&mut stream).await,
        Err(SocksError::Io(_))
    ));
}

// ---------------------------------------------------------------------------
// Username/password sub-negotiation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn userpass_round_trip() {
    let auth = UserPassAuth {
        username: b"alice".to_vec(),
        password: b"wonderland".to_vec(),
    };

    let mut stream = MockStream::new(encode_userpass_auth(&auth));
    let decoded = parse_userpass_auth(&mut stream).await.unwrap();
    assert_eq!(decoded, auth);
}

#[tokio::test]
async fn userpass_exact_wire_form() {
    let mut bytes = vec![0x01, 0x05];
    bytes.extend_from_slice(b"alice");
    bytes.push(0x0A);
    bytes.extend_from_slice(b"wonderland");

    let mut stream = MockStream::new(bytes);
    let auth = parse_userpass_auth(&mut stream).await.unwrap();
    assert_eq!(auth.username, b"alice");
    assert_eq!(auth.password, b"wonderland");
}

#[tokio::test]
async fn userpass_rejects_wrong_subversion() {
    // The sub-negotiation version is 1, not the outer SOCKS version
    let mut stream = MockStream::new(vec![0x05, 0x01, b'a', 0x01, b'b']);
    assert!(matches!(
        parse_userpass_auth(&mut stream).await,
        Err(SocksError::AuthUserPassVer(0x05))
    ));
}

#[tokio::test]
async fn userpass_max_field_lengths() {
    let auth = UserPassAuth {
        username: vec![b'u'; 255],
        password: vec![b'p'; 255],
    };

    let mut stream = MockStream::new(encode_userpass_auth(&auth));
    let decoded = parse_userpass_auth(&mut stream).await.unwrap();
    assert_eq!(decoded, auth);
}

#[tokio::test]
async fn userpass_truncated_password() {
    // plen says 4 but the stream ends after one byte
    let bytes = vec![0x01, 0x02, b'a', b'b', 0x04, b'x'];

    let mut stream = MockStream::new(bytes);
    assert!(parse_userpass_auth(&mut stream).await.is_err());
}

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_round_trip_all_address_kinds() {
    let requests = [
        SocksRequest {
            command: Command::Connect,
            address: Address::IPv4([203, 0, 113, 7]),
            port: 4242,
        },
        SocksRequest {
            command: Command::UdpAssociate,
            address: Address::IPv6([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
            port: 53,
        },
        SocksRequest {
            command: Command::Bind,
            address: Address::Domain("example.com".to_string()),
            port: 80,
        },
    ];

    for request in requests {
        let mut stream = MockStream::new(encode_request(&request));
        let decoded = parse_request(&mut stream).await.unwrap();
        assert_eq!(decoded, request);
    }
}

#[tokio::test]
async fn request_rejects_wrong_version() {
    let request = SocksRequest {
        command: Command::Connect,
        address: Address::IPv4([127, 0, 0, 1]),
        port: 80,
    };
    let mut bytes = encode_request(&request);
    bytes[0] = 0x04;

    let mut stream = MockStream::new(bytes);
    assert!(matches!(
        parse_request(&mut stream).await,
        Err(SocksError::SocksVersion(0x04))
    ));
}

#[tokio::test]
async fn request_rejects_unknown_command() {
    let mut bytes = vec![0x05, 0x09, 0x00];
    Address::IPv4([127, 0, 0, 1]).write_to(&mut bytes, 80);

    let mut stream = MockStream::new(bytes);
    assert!(matches!(
        parse_request(&mut stream).await,
        Err(SocksError::CmdNotSupported(0x09))
    ));
}

#[tokio::test]
async fn request_rejects_unknown_address_type() {
    let bytes = vec![0x05, 0x01, 0x00, 0x02, 1, 2, 3, 4, 0x00, 0x50];

    let mut stream = MockStream::new(bytes);
    assert!(matches!(
        parse_request(&mut stream).await,
        Err(SocksError::AddressType(0x02))
    ));
}

#[tokio::test]
async fn request_rejects_zero_length_domain() {
    let bytes = vec![0x05, 0x01, 0x00, 0x03, 0x00, 0x00, 0x50];

    let mut stream = MockStream::new(bytes);
    assert!(matches!(
        parse_request(&mut stream).await,
        Err(SocksError::BadRequest)
    ));
}

#[tokio::test]
async fn reply_round_trip() {
    let mut server_side = MockStream::new(Vec::new());
    send_reply(
        &mut server_side,
        ReplyCode::Succeeded,
        &Address::IPv4([10, 0, 0, 1]),
        1080,
    )
    .await
    .unwrap();

    let mut client_side = MockStream::new(server_side.write_buf);
    let (reply, address, port) = read_reply(&mut client_side).await.unwrap();
    assert_eq!(reply, ReplyCode::Succeeded);
    assert_eq!(address, Address::IPv4([10, 0, 0, 1]));
    assert_eq!(port, 1080);
}

#[tokio::test]
async fn method_choice_round_trip() {
    let mut server_side = MockStream::new(Vec::new());
    send_method_choice(&mut server_side, AuthMethod::UserPass)
        .await
        .unwrap();
    assert_eq!(server_side.write_buf, vec![0x05, 0x02]);

    let mut client_side = MockStream::new(server_side.write_buf);
    let method = read_method_choice(&mut client_side).await.unwrap();
    assert_eq!(method, AuthMethod::UserPass);
}

#[tokio::test]
async fn auth_reply_round_trip() {
    let mut server_side = MockStream::new(Vec::new());
    send_auth_reply(&mut server_side, false).await.unwrap();
    assert_eq!(server_side.write_buf, vec![0x01, 0x01]);

    let mut client_side = MockStream::new(server_side.write_buf);
    assert_eq!(read_auth_reply(&mut client_side).await.unwrap(), 0x01);
}

// ---------------------------------------------------------------------------
// Address truncation laws
// ---------------------------------------------------------------------------

#[test]
fn address_truncations_fail_typed() {
    let encodings = [
        Address::IPv4([203, 0, 113, 7]).to_bytes(4242),
        Address::IPv6([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9]).to_bytes(443),
        Address::Domain("example.com".to_string()).to_bytes(80),
    ];

    for encoding in encodings {
        for keep in 0..encoding.len() {
            let err = Address::from_bytes(&encoding[..keep]).unwrap_err();
            assert!(
                matches!(err, SocksError::BadRequest | SocksError::AddressType(_)),
                "truncation to {} bytes gave {:?}",
                keep,
                err
            );
        }
    }
}

// ---------------------------------------------------------------------------
// UDP envelope
// ---------------------------------------------------------------------------

#[test]
fn udp_packet_round_trip_all_address_kinds() {
    let packets = [
        UdpPacket {
            header: UdpHeader {
                frag: 0,
                address: Address::IPv4([8, 8, 4, 4]),
                port: 53,
            },
            data: Bytes::from_static(b"dns query"),
        },
        UdpPacket {
            header: UdpHeader {
                frag: 0,
                address: Address::IPv6([0x20, 0x01, 0x48, 0x60, 0x48, 0x60, 0, 0, 0, 0, 0, 0, 0, 0, 0x88, 0x88]),
                port: 53,
            },
            data: Bytes::from_static(b""),
        },
        UdpPacket {
            header: UdpHeader {
                frag: 0,
                address: Address::Domain("resolver.example".to_string()),
                port: 5353,
            },
            data: Bytes::from_static(b"payload"),
        },
    ];

    for packet in packets {
        let bytes = serialize_udp_packet(&packet);
        let decoded = parse_udp_packet(Bytes::from(bytes)).unwrap();
        assert_eq!(decoded, packet);
    }
}

#[test]
fn udp_packet_envelope_truncations_fail() {
    let packet = UdpPacket {
        header: UdpHeader {
            frag: 0,
            address: Address::IPv4([192, 0, 2, 1]),
            port: 7,
        },
        data: Bytes::from_static(b"x"),
    };
    let bytes = serialize_udp_packet(&packet);
    let header_len = bytes.len() - 1;

    // Cutting into the envelope itself must fail; the payload is variable
    for keep in 0..header_len {
        assert!(
            parse_udp_packet(Bytes::copy_from_slice(&bytes[..keep])).is_err(),
            "truncation to {} bytes parsed",
            keep
        );
    }
}

#[test]
fn udp_packet_fragment_is_rejected() {
    let packet = UdpPacket {
        header: UdpHeader {
            frag: 0,
            address: Address::IPv4([192, 0, 2, 1]),
            port: 7,
        },
        data: Bytes::from_static(b"x"),
    };
    let mut bytes = serialize_udp_packet(&packet);
    bytes[2] = 0x03;

    assert!(matches!(
        parse_udp_packet(Bytes::from(bytes)),
        Err(SocksError::UdpFrag(0x03))
    ));
}
