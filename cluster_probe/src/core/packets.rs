use crate::core::PacketError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a packet for the master/worker channel.
pub fn serialize<T: Serialize>(item: &T) -> Result<Vec<u8>, PacketError> {
  serde_cbor::to_vec(item).map_err(PacketError::Encode)
}

/// Decodes a packet received on the master/worker channel.
pub fn deserialize<T: DeserializeOwned>(
  bytes: &[u8],
) -> Result<T, PacketError> {
  serde_cbor::from_slice(bytes).map_err(PacketError::Decode)
}

#[test]
fn test_packet_rejects_garbage() {
  let res = deserialize::<crate::core::WorkerAck>(&[0xff, 0x00, 0x13]);
  assert!(matches!(res, Err(PacketError::Decode(_))));
}
