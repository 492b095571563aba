//! Reference-counted log messages living inside slab blocks.
//!
//! A message is written into a single block of a [`SlabAllocator`]: a header
//! (reference count, owning allocator, the block itself, the [`Message`]
//! value) followed by the rendered text. Formatted text is rendered straight
//! into the block, so a message costs exactly one slab allocation. The block
//! goes back to its bucket when the last [`MessageRef`] is released.

use std::fmt::{self, Write as _};
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::category::{Level, LogCategory};
use crate::site::SiteInfo;
use crate::slab::{SlabAllocator, SlabBlock, BLOCK_ALIGN};

/// Structured payload attached to a message.
pub type StructuredData = Map<String, Value>;

/// The value carried by a [`MessageRef`].
pub struct Message {
    category: &'static LogCategory,
    level: Level,
    site: SiteInfo,
    text_ptr: NonNull<u8>,
    text_len: usize,
    owns_text: bool,
    data: Option<StructuredData>,
}

// SAFETY: the text is immutable and either 'static or stored in the same slab
// block as the message, which outlives every reference to it.
unsafe impl Send for Message {}
unsafe impl Sync for Message {}

impl Message {
    #[inline]
    pub fn category(&self) -> &'static LogCategory {
        self.category
    }

    #[inline]
    pub fn level(&self) -> Level {
        self.level
    }

    #[inline]
    pub fn site(&self) -> &SiteInfo {
        &self.site
    }

    #[inline]
    pub fn text(&self) -> &str {
        // SAFETY: text_ptr/text_len describe valid UTF-8 written at allocation
        // time (or a 'static str) that lives as long as the message.
        unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(
                self.text_ptr.as_ptr(),
                self.text_len,
            ))
        }
    }

    /// True when the text was copied into the message's own block.
    #[inline]
    pub fn owns_text(&self) -> bool {
        self.owns_text
    }

    #[inline]
    pub fn data(&self) -> Option<&StructuredData> {
        self.data.as_ref()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("category", &self.category.name())
            .field("level", &self.level)
            .field("text", &self.text())
            .field("owns_text", &self.owns_text)
            .field("data", &self.data)
            .finish()
    }
}

#[repr(C)]
struct MessageHeader {
    ref_count: AtomicU32,
    block: SlabBlock,
    owner: ManuallyDrop<Arc<SlabAllocator>>,
    message: Message,
}

const HEADER_SIZE: usize = mem::size_of::<MessageHeader>();
const _: () = assert!(mem::align_of::<MessageHeader>() <= BLOCK_ALIGN);

/// Text of a message being built.
pub enum Payload<'a> {
    /// Borrowed for the whole process, never copied.
    Static(&'static str),
    /// Copied into the message block.
    Text(&'a str),
    /// Rendered into the message block.
    Args(fmt::Arguments<'a>),
    /// Rendered text plus structured data.
    Structured {
        text: fmt::Arguments<'a>,
        data: StructuredData,
    },
    /// `{name}` placeholders filled from `fields`; the fields are kept as data.
    Template {
        template: &'a str,
        fields: StructuredData,
    },
}

/// Everything the facade hands to a low-level logger for one call.
pub struct Record<'a> {
    pub category: &'static LogCategory,
    pub level: Level,
    pub site: SiteInfo,
    pub payload: Payload<'a>,
}

impl Record<'_> {
    /// Renders the payload into a `String`, for loggers that never allocate
    /// from a slab.
    pub fn text(&self) -> String {
        match &self.payload {
            Payload::Static(s) => (*s).to_owned(),
            Payload::Text(s) => (*s).to_owned(),
            Payload::Args(args) => args.to_string(),
            Payload::Structured { text, .. } => text.to_string(),
            Payload::Template { template, fields } => {
                TemplateDisplay {
                    template: *template,
                    fields,
                }
                .to_string()
            }
        }
    }
}

/// Renders a `{name}` template against a field map.
///
/// `{{` and `}}` escape braces. Unknown names are left in place.
pub struct TemplateDisplay<'a> {
    pub template: &'a str,
    pub fields: &'a StructuredData,
}

impl fmt::Display for TemplateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.template;
        while let Some(pos) = rest.find(['{', '}']) {
            f.write_str(&rest[..pos])?;
            let tail = &rest[pos..];
            if tail.starts_with("{{") {
                f.write_char('{')?;
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                f.write_char('}')?;
                rest = &tail[2..];
            } else if tail.starts_with('{') {
                match tail.find('}') {
                    Some(end) => {
                        let name = &tail[1..end];
                        match self.fields.get(name) {
                            Some(Value::String(s)) => f.write_str(s)?,
                            Some(value) => write!(f, "{value}")?,
                            None => f.write_str(&tail[..=end])?,
                        }
                        rest = &tail[end + 1..];
                    }
                    None => {
                        f.write_str(tail)?;
                        rest = "";
                    }
                }
            } else {
                f.write_char('}')?;
                rest = &tail[1..];
            }
        }
        f.write_str(rest)
    }
}

struct ByteCounter(usize);

impl fmt::Write for ByteCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Writes into raw block memory, stopping at capacity on a char boundary.
struct BlockWriter {
    ptr: *mut u8,
    capacity: usize,
    len: usize,
}

impl fmt::Write for BlockWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.capacity - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        // SAFETY: len + take <= capacity, the region belongs to the block.
        unsafe { ptr::copy_nonoverlapping(s.as_ptr(), self.ptr.add(self.len), take) };
        self.len += take;
        if take < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

enum TextSource<'a> {
    Borrowed(&'static str),
    Copy(&'a str),
    Render(&'a dyn fmt::Display),
}

fn build(
    allocator: &Arc<SlabAllocator>,
    category: &'static LogCategory,
    level: Level,
    site: SiteInfo,
    text: TextSource<'_>,
    data: Option<StructuredData>,
) -> MessageRef {
    let text_capacity = match &text {
        TextSource::Borrowed(_) => 0,
        TextSource::Copy(s) => s.len(),
        TextSource::Render(display) => {
            let mut counter = ByteCounter(0);
            let _ = write!(counter, "{display}");
            counter.0
        }
    };

    let block = allocator.acquire_bucket().allocate(HEADER_SIZE + text_capacity);
    let base = block.as_ptr();
    // SAFETY: the block holds HEADER_SIZE + text_capacity bytes.
    let inline_text = unsafe { base.add(HEADER_SIZE) };

    let (text_ptr, text_len, owns_text) = match text {
        TextSource::Borrowed(s) => (s.as_ptr() as *mut u8, s.len(), false),
        TextSource::Copy(s) => {
            // SAFETY: text_capacity == s.len() bytes are reserved after the header.
            unsafe { ptr::copy_nonoverlapping(s.as_ptr(), inline_text, s.len()) };
            (inline_text, s.len(), true)
        }
        TextSource::Render(display) => {
            let mut writer = BlockWriter {
                ptr: inline_text,
                capacity: text_capacity,
                len: 0,
            };
            // A Display impl that renders longer the second time is truncated.
            let _ = write!(writer, "{display}");
            (inline_text, writer.len, true)
        }
    };

    let header = MessageHeader {
        ref_count: AtomicU32::new(1),
        block,
        owner: ManuallyDrop::new(Arc::clone(allocator)),
        message: Message {
            category,
            level,
            site,
            text_ptr: NonNull::new(text_ptr).unwrap_or(NonNull::dangling()),
            text_len,
            owns_text,
            data,
        },
    };

    let header_ptr = base as *mut MessageHeader;
    // SAFETY: the block is BLOCK_ALIGN aligned and at least HEADER_SIZE long.
    unsafe { ptr::write(header_ptr, header) };
    MessageRef {
        // SAFETY: base comes from a NonNull block pointer.
        header: unsafe { NonNull::new_unchecked(header_ptr) },
    }
}

/// Allocates a message whose text is borrowed for the whole process.
pub fn allocate_log(
    allocator: &Arc<SlabAllocator>,
    category: &'static LogCategory,
    level: Level,
    site: SiteInfo,
    text: &'static str,
) -> MessageRef {
    build(allocator, category, level, site, TextSource::Borrowed(text), None)
}

/// Allocates a message holding a copy of `text`.
pub fn allocate_log_copy(
    allocator: &Arc<SlabAllocator>,
    category: &'static LogCategory,
    level: Level,
    site: SiteInfo,
    text: &str,
) -> MessageRef {
    build(allocator, category, level, site, TextSource::Copy(text), None)
}

/// Allocates a message rendered from `args`.
///
/// Arguments without any placeholder are borrowed instead of copied.
pub fn allocate_log_fmt(
    allocator: &Arc<SlabAllocator>,
    category: &'static LogCategory,
    level: Level,
    site: SiteInfo,
    args: fmt::Arguments<'_>,
) -> MessageRef {
    let text = match args.as_str() {
        Some(s) => TextSource::Borrowed(s),
        None => TextSource::Render(&args),
    };
    build(allocator, category, level, site, text, None)
}

/// Allocates a message rendered from `args` carrying structured `data`.
pub fn allocate_log_structured(
    allocator: &Arc<SlabAllocator>,
    category: &'static LogCategory,
    level: Level,
    site: SiteInfo,
    args: fmt::Arguments<'_>,
    data: StructuredData,
) -> MessageRef {
    let text = match args.as_str() {
        Some(s) => TextSource::Borrowed(s),
        None => TextSource::Render(&args),
    };
    build(allocator, category, level, site, text, Some(data))
}

/// Allocates a message from a `{name}` template and its fields.
///
/// The rendered template becomes the text; the fields stay attached as
/// structured data.
pub fn allocate_record_args(
    allocator: &Arc<SlabAllocator>,
    category: &'static LogCategory,
    level: Level,
    site: SiteInfo,
    template: &str,
    fields: StructuredData,
) -> MessageRef {
    let display = TemplateDisplay {
        template,
        fields: &fields,
    };
    let message = {
        let text = TextSource::Render(&display);
        build(allocator, category, level, site, text, None)
    };
    // SAFETY: the message is not shared yet, this is the only reference.
    unsafe { (*message.header.as_ptr()).message.data = Some(fields) };
    message
}

/// Allocates a message for `record`.
pub fn allocate(allocator: &Arc<SlabAllocator>, record: Record<'_>) -> MessageRef {
    let Record {
        category,
        level,
        site,
        payload,
    } = record;
    match payload {
        Payload::Static(text) => allocate_log(allocator, category, level, site, text),
        Payload::Text(text) => allocate_log_copy(allocator, category, level, site, text),
        Payload::Args(args) => allocate_log_fmt(allocator, category, level, site, args),
        Payload::Structured { text, data } => {
            allocate_log_structured(allocator, category, level, site, text, data)
        }
        Payload::Template { template, fields } => {
            allocate_record_args(allocator, category, level, site, template, fields)
        }
    }
}

/// Counted reference to a slab-resident [`Message`].
///
/// Not `Clone`: an extra reference is taken with [`acquire`](Self::acquire)
/// and given back with [`release`](Self::release) (or by dropping it). The
/// block returns to the bucket it was allocated from when the count reaches
/// zero.
pub struct MessageRef {
    header: NonNull<MessageHeader>,
}

// SAFETY: the count is atomic and the message itself is Send + Sync.
unsafe impl Send for MessageRef {}
unsafe impl Sync for MessageRef {}

impl MessageRef {
    #[inline]
    fn header(&self) -> &MessageHeader {
        // SAFETY: the header stays valid while this reference holds a count.
        unsafe { self.header.as_ref() }
    }

    /// Takes another reference to the same message.
    pub fn acquire(&self) -> MessageRef {
        let previous = self.header().ref_count.fetch_add(1, Ordering::Relaxed);
        assert!(previous > 0 && previous < u32::MAX, "acquire on a dead message");
        MessageRef {
            header: self.header,
        }
    }

    /// Gives back this reference.
    ///
    /// Returns true when it was the last one and the block has been returned
    /// to its bucket.
    pub fn release(self) -> bool {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never used again.
        unsafe { Self::release_raw(this.header) }
    }

    unsafe fn release_raw(header: NonNull<MessageHeader>) -> bool {
        let h = header.as_ptr();
        let previous = (*h).ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "double release of a message");
        if previous != 1 {
            return false;
        }
        fence(Ordering::Acquire);

        let block = (*h).block;
        let owner = ManuallyDrop::take(&mut (*h).owner);
        ptr::drop_in_place(ptr::addr_of_mut!((*h).message));
        owner.deallocate(block);
        true
    }

    pub fn ref_count(&self) -> u32 {
        self.header().ref_count.load(Ordering::Acquire)
    }

    /// The block backing this message.
    pub fn block(&self) -> SlabBlock {
        self.header().block
    }

    /// The allocator the block will be returned to.
    pub fn allocator(&self) -> &Arc<SlabAllocator> {
        &self.header().owner
    }
}

impl Deref for MessageRef {
    type Target = Message;

    #[inline]
    fn deref(&self) -> &Message {
        &self.header().message
    }
}

impl Drop for MessageRef {
    fn drop(&mut self) {
        // SAFETY: the handle is being destroyed and holds one count.
        unsafe {
            Self::release_raw(self.header);
        }
    }
}

impl fmt::Debug for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRef")
            .field("ref_count", &self.ref_count())
            .field("bucket", &self.block().bucket())
            .field("message", &**self)
            .finish()
    }
}
