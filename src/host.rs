use std::net::Ipv4Addr;

use anyhow::{Context, Result, anyhow};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

pub fn hostname() -> Result<String> {
  let name = nix::unistd::gethostname().context("failed to read host name")?;
  name
    .into_string()
    .map_err(|raw| anyhow!("host name is not valid UTF-8: {raw:?}"))
}

/// First non-loopback IPv4 address of this host.
pub fn local_ipv4() -> Result<Ipv4Addr> {
  for iface in getifaddrs().context("failed to list interfaces")? {
    if iface.flags.contains(InterfaceFlags::IFF_LOOPBACK) {
      continue;
    }
    if let Some(sin) = iface.address.as_ref().and_then(|a| a.as_sockaddr_in()) {
      let ip = Ipv4Addr::from(sin.ip());
      if !ip.is_loopback() && !ip.is_unspecified() {
        return Ok(ip);
      }
    }
  }
  Err(anyhow!("no valid local IP found"))
}
