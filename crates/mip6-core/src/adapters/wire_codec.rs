//! Destination-option encoding of mobility options.
//!
//! Each option is `type | length | body | sub-options`, where `length`
//! counts every byte after the length field and each sub-option is itself
//! `type | length | data`. Multi-byte fields are big-endian.
//!
//! ```text
//! Update   198  len  flags  prefix_len  seq  reserved  lifetime(4)
//! Ack        7  len  status  seq  lifetime(4)  refresh(4)
//! Request    8  len
//! ```

use crate::domain::{MobilityOption, OptionKind};
use crate::ports::{CodecError, OptionCodec};

pub const UPDATE_OPTION_TYPE: u8 = 198;
pub const ACK_OPTION_TYPE: u8 = 7;
pub const REQUEST_OPTION_TYPE: u8 = 8;

#[derive(Debug, Default, Clone, Copy)]
pub struct DestinationOptionCodec;

impl DestinationOptionCodec {
    fn header(kind: OptionKind) -> (u8, usize) {
        match kind {
            OptionKind::Update => (UPDATE_OPTION_TYPE, 10),
            OptionKind::Ack => (ACK_OPTION_TYPE, 12),
            OptionKind::Request => (REQUEST_OPTION_TYPE, 2),
        }
    }
}

impl OptionCodec for DestinationOptionCodec {
    fn encode(
        &self,
        buffer: &mut [u8],
        offset: usize,
        option: &MobilityOption,
    ) -> Result<usize, CodecError> {
        let (option_type, fixed) = Self::header(option.kind());
        let needed = fixed
            + option
                .sub_options()
                .iter()
                .map(|sub| 2 + sub.data.len())
                .sum::<usize>();
        let available = buffer.len().saturating_sub(offset);
        // The length byte must also be able to describe the option.
        if needed > available || needed - 2 > usize::from(u8::MAX) {
            return Err(CodecError::DoesNotFit { needed, available });
        }
        if option
            .sub_options()
            .iter()
            .any(|sub| sub.data.len() > usize::from(u8::MAX))
        {
            return Err(CodecError::DoesNotFit { needed, available });
        }

        let out = &mut buffer[offset..offset + needed];
        out[0] = option_type;
        out[1] = (needed - 2) as u8;
        match option {
            MobilityOption::Update(update) => {
                out[2] = update.flags.bits();
                out[3] = update.prefix_len;
                out[4] = update.sequence.value();
                out[5] = 0;
                out[6..10].copy_from_slice(&update.lifetime.to_be_bytes());
            }
            MobilityOption::Ack(ack) => {
                out[2] = ack.status.0;
                out[3] = ack.sequence.value();
                out[4..8].copy_from_slice(&ack.lifetime.to_be_bytes());
                out[8..12].copy_from_slice(&ack.refresh.to_be_bytes());
            }
            MobilityOption::Request(_) => {}
        }

        let mut pos = fixed;
        for sub in option.sub_options() {
            out[pos] = sub.kind;
            out[pos + 1] = sub.data.len() as u8;
            out[pos + 2..pos + 2 + sub.data.len()].copy_from_slice(&sub.data);
            pos += 2 + sub.data.len();
        }
        Ok(offset + needed)
    }
}
