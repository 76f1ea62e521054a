use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocksError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not SOCKS version 5: 0x{0:02x}")]
    SocksVersion(u8),

    #[error("user/pass auth version is not 1: 0x{0:02x}")]
    AuthUserPassVer(u8),

    #[error("no acceptable authentication method")]
    MethodNotAcceptable,

    #[error("user authentication failed")]
    AuthFailed,

    #[error("bad request")]
    BadRequest,

    #[error("unrecognized address type: 0x{0:02x}")]
    AddressType(u8),

    #[error("fragmented UDP datagram not supported: frag={0}")]
    UdpFrag(u8),

    #[error("command not supported: 0x{0:02x}")]
    CmdNotSupported(u8),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SocksError>;
