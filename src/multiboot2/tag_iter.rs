use super::{MbTagHeader, TagType};
use crate::memory::VirtualAddress;

pub(crate) struct MbTagIter {
    curr_tag_addr: *const MbTagHeader,
    max_tag_addr: VirtualAddress,
}

impl MbTagIter {
    // Safety: the pointer comes from a validated MbBootInfo, so it is non
    // null, aligned and points at the first tag of the stream.
    pub(crate) fn new(curr_tag_addr: *const MbTagHeader, max_tag_addr: VirtualAddress) -> Self {
        MbTagIter {
            curr_tag_addr,
            max_tag_addr,
        }
    }
}

impl Iterator for MbTagIter {
    type Item = &'static MbTagHeader;

    fn next(&mut self) -> Option<Self::Item> {
        // a truncated stream without its terminator ends here instead of
        // running off the structure
        if self.curr_tag_addr as VirtualAddress + size_of::<MbTagHeader>() > self.max_tag_addr {
            return None;
        }

        let curr_tag = unsafe { &*self.curr_tag_addr };
        match curr_tag.tag_type() {
            TagType::End => None,
            _ => {
                // tags are padded to 8-byte boundaries
                let ptr_offset = ((curr_tag.size as usize + 7) & !7) as isize;
                assert!(ptr_offset > 0);

                self.curr_tag_addr = unsafe { self.curr_tag_addr.byte_offset(ptr_offset) };
                Some(curr_tag)
            }
        }
    }
}
