use std::{fmt, net::Ipv6Addr, str::FromStr};

use crate::error::ChatError;

/// Port the relay listens on when none is given.
pub const DEFAULT_PORT: u16 = 10001;

/// A validated `host:port` pair. Only constructed from trimmed, checked input,
/// so anything holding an `Address` can hand it straight to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: &str, port: u16) -> Result<Self, ChatError> {
        let host = host.trim();
        validate_host(host, host)?;
        if port == 0 {
            return Err(ChatError::invalid_address(
                host,
                "port must be between 1 and 65535",
            ));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Parses `host:port`, `host`, `[v6]:port`, `[v6]` or a bare IPv6 literal.
    /// Inputs without a port get `default_port`.
    pub fn parse_with_default_port(input: &str, default_port: u16) -> Result<Self, ChatError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ChatError::invalid_address(input, "address is empty"));
        }

        let (host, port) = split_host_port(trimmed)?;
        validate_host(host, input)?;

        let port = match port {
            Some(port) => parse_port(port, input)?,
            None => default_port,
        };
        if port == 0 {
            return Err(ChatError::invalid_address(
                input,
                "port must be between 1 and 65535",
            ));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Address {
    type Err = ChatError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default_port(input, DEFAULT_PORT)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(input: &str) -> Result<(&str, Option<&str>), ChatError> {
    if let Some(rest) = input.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            return Err(ChatError::invalid_address(input, "missing closing ']'"));
        };
        if !host.is_empty() && host.parse::<Ipv6Addr>().is_err() {
            return Err(ChatError::invalid_address(
                input,
                "brackets must enclose an IPv6 address",
            ));
        }
        return match tail {
            "" => Ok((host, None)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((host, Some(port))),
                None => Err(ChatError::invalid_address(
                    input,
                    "unexpected characters after ']'",
                )),
            },
        };
    }

    // More than one colon without brackets can only be an IPv6 literal.
    if input.matches(':').count() > 1 {
        if input.parse::<Ipv6Addr>().is_err() {
            return Err(ChatError::invalid_address(
                input,
                "too many ':' for host:port and not an IPv6 address",
            ));
        }
        return Ok((input, None));
    }

    match input.split_once(':') {
        Some((host, port)) => Ok((host, Some(port))),
        None => Ok((input, None)),
    }
}

fn validate_host(host: &str, input: &str) -> Result<(), ChatError> {
    if host.is_empty() {
        return Err(ChatError::invalid_address(input, "host is empty"));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(ChatError::invalid_address(input, "host contains whitespace"));
    }
    if host.contains(':') && host.parse::<Ipv6Addr>().is_err() {
        return Err(ChatError::invalid_address(
            input,
            "host contains ':' but is not an IPv6 address",
        ));
    }
    Ok(())
}

fn parse_port(port: &str, input: &str) -> Result<u16, ChatError> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChatError::invalid_address(input, "port is not a number"));
    }
    port.parse::<u16>()
        .map_err(|_| ChatError::invalid_address(input, "port must be between 1 and 65535"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(input: &str) -> &'static str {
        match input.parse::<Address>() {
            Err(ChatError::InvalidAddress { reason, .. }) => reason,
            other => panic!("expected invalid address for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn parses_host_and_port_after_trimming() {
        let address: Address = "  chat.local:4000 \n".parse().expect("valid address");
        assert_eq!(address.host(), "chat.local");
        assert_eq!(address.port(), 4000);
        assert_eq!(address.to_string(), "chat.local:4000");
    }

    #[test]
    fn missing_port_falls_back_to_default() {
        let address: Address = "localhost".parse().expect("valid address");
        assert_eq!(address.port(), DEFAULT_PORT);

        let custom = Address::parse_with_default_port("localhost", 7000).expect("valid address");
        assert_eq!(custom.port(), 7000);
    }

    #[test]
    fn ipv6_forms_are_accepted() {
        let bracketed: Address = "[::1]:9000".parse().expect("bracketed");
        assert_eq!(bracketed.host(), "::1");
        assert_eq!(bracketed.port(), 9000);
        assert_eq!(bracketed.to_string(), "[::1]:9000");

        let bare: Address = "::1".parse().expect("bare literal");
        assert_eq!(bare.host(), "::1");
        assert_eq!(bare.port(), DEFAULT_PORT);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(reason(""), "address is empty");
        assert_eq!(reason("   "), "address is empty");
        assert_eq!(reason(":80"), "host is empty");
        assert_eq!(reason("my host:80"), "host contains whitespace");
        assert_eq!(reason("host:http"), "port is not a number");
        assert_eq!(reason("host:"), "port is not a number");
        assert_eq!(reason("host:0"), "port must be between 1 and 65535");
        assert_eq!(reason("host:65536"), "port must be between 1 and 65535");
        assert_eq!(reason("[::1:80"), "missing closing ']'");
        assert_eq!(reason("[::1]x"), "unexpected characters after ']'");
        assert_eq!(
            reason("localhost:80:90"),
            "too many ':' for host:port and not an IPv6 address"
        );
        assert_eq!(reason("[foo]:80"), "brackets must enclose an IPv6 address");
        assert_eq!(reason("[10.0.0.1]"), "brackets must enclose an IPv6 address");
        assert_eq!(reason("[]:80"), "host is empty");
    }

    #[test]
    fn new_validates_like_parse() {
        assert!(Address::new("localhost", 0).is_err());
        assert!(Address::new(" ", 80).is_err());
        let address = Address::new(" 127.0.0.1 ", 80).expect("valid");
        assert_eq!(address.host(), "127.0.0.1");
        assert!(Address::new("localhost:80", 90).is_err());
        let v6 = Address::new("fe80::1", 90).expect("ipv6 host");
        assert_eq!(v6.to_string(), "[fe80::1]:90");
    }
}
