//! UDS protocol constants and helpers for the simulated ECU

/// UDS Service IDs
pub mod service_id {
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// RoutineControl sub-functions
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
}

/// UDS Negative Response Codes
pub mod nrc {
    pub const INCORRECT_MESSAGE_LENGTH: u8 = 0x13;
    pub const REQUEST_OUT_OF_RANGE: u8 = 0x31;
}

/// Offset between a request service ID and its positive response ID
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Largest payload a single ISO-TP transfer can carry (12-bit length)
pub const MAX_PAYLOAD_LEN: usize = 4095;

/// Create a positive response for a service
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id.wrapping_add(POSITIVE_RESPONSE_OFFSET));
    response.extend_from_slice(data);
    response
}

/// Create a negative response
pub fn negative_response(service_id: u8, nrc: u8) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, service_id, nrc]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            positive_response(service_id::TRANSFER_DATA, &[0x05]),
            vec![0x76, 0x05]
        );
        assert_eq!(
            negative_response(service_id::ROUTINE_CONTROL, nrc::INCORRECT_MESSAGE_LENGTH),
            vec![0x7F, 0x31, 0x13]
        );
    }
}
