use crate::buffer::{create_line_starts, BufferCursor, StringBuffer};
use crate::eol::{self, EndOfLine, CR, LF};
use crate::error::OutOfRange;
use crate::node::{NodeIdx, TreeNode, NIL};

/// A descriptor naming a half-open slice of one backing buffer.
///
/// `length` is the byte distance between the resolved cursors and
/// `line_feed_cnt` the number of terminators between them, CRLF counting
/// once even when a cursor lands between its two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub(crate) buffer_index: usize,
    pub(crate) start: BufferCursor,
    pub(crate) end: BufferCursor,
    pub(crate) length: usize,
    pub(crate) line_feed_cnt: usize,
}

impl Piece {
    pub(crate) fn sentinel() -> Self {
        Self {
            buffer_index: 0,
            start: BufferCursor::default(),
            end: BufferCursor::default(),
            length: 0,
            line_feed_cnt: 0,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn line_feed_count(&self) -> usize {
        self.line_feed_cnt
    }
}

/// Result of resolving a document offset to the node containing it.
struct NodePosition {
    node: NodeIdx,
    /// Byte offset of the resolved position within the node's piece.
    remainder: usize,
    /// Document offset at which the node's piece begins.
    node_start_offset: usize,
}

/// A piece-table document: immutable chunk buffers plus one growing added
/// buffer, indexed by a red-black tree ordered by document position.
///
/// All offsets, lengths and columns are UTF-8 bytes; lines are zero-based.
#[derive(Debug, Clone)]
pub struct PieceTree {
    pub(crate) nodes: Vec<TreeNode>,
    pub(crate) free: Vec<NodeIdx>,
    pub(crate) root: NodeIdx,
    pub(crate) buffers: Vec<StringBuffer>,
    /// Index of the mutable added buffer once the first insert created it.
    added: Option<usize>,
    /// End cursor of the most recent append into the added buffer.
    last_added_pos: BufferCursor,
    pub(crate) length: usize,
    pub(crate) line_feed_cnt: usize,
    eol: EndOfLine,
    eol_normalized: bool,
}

impl PieceTree {
    /// Build a document over `chunks`, one piece per non-empty chunk in
    /// receive order. The chunk list becomes the original buffers; an empty
    /// list still yields a well-formed empty document.
    pub fn new(chunks: Vec<StringBuffer>, eol: EndOfLine, eol_normalized: bool) -> Self {
        let mut tree = Self {
            nodes: vec![TreeNode::sentinel()],
            free: Vec::new(),
            root: NIL,
            buffers: chunks,
            added: None,
            last_added_pos: BufferCursor::default(),
            length: 0,
            line_feed_cnt: 0,
            eol,
            eol_normalized,
        };
        if tree.buffers.is_empty() {
            tree.buffers.push(StringBuffer::new(String::new()));
        }

        let mut last = NIL;
        for index in 0..tree.buffers.len() {
            if tree.buffers[index].is_empty() {
                continue;
            }
            let buf = &tree.buffers[index];
            let end_line = buf.line_starts.len() - 1;
            let piece = Piece {
                buffer_index: index,
                start: BufferCursor::new(0, 0),
                end: BufferCursor::new(end_line, buf.len() - buf.line_starts[end_line]),
                length: buf.len(),
                line_feed_cnt: end_line,
            };
            last = tree.rb_insert_right(last, piece);
        }
        tree.compute_buffer_metadata();
        tree
    }

    /// Total document length in bytes. O(1).
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of lines, always at least 1. O(1).
    pub fn line_count(&self) -> usize {
        self.line_feed_cnt + 1
    }

    /// The terminator chosen when the document was built.
    pub fn eol(&self) -> EndOfLine {
        self.eol
    }

    // ---------- mutation ----------

    /// Insert `text` so that its first byte lands at `offset`.
    pub fn insert(&mut self, offset: usize, text: &str) -> Result<(), OutOfRange> {
        if offset > self.length {
            return Err(OutOfRange::Offset {
                offset,
                len: self.length,
            });
        }
        if text.is_empty() {
            return Ok(());
        }
        // text without terminators cannot break an EOL-normalized document
        self.eol_normalized = self.eol_normalized && !text.bytes().any(|b| b == CR || b == LF);

        let value = String::from(text);
        if self.root == NIL {
            let piece = self.create_new_piece(&value);
            self.rb_insert_left(NIL, piece);
        } else {
            let NodePosition {
                node,
                remainder,
                node_start_offset,
            } = self.node_at(offset);
            let piece = self.nodes[node].piece;
            if self.added == Some(piece.buffer_index)
                && piece.end == self.last_added_pos
                && node_start_offset + piece.length == offset
            {
                self.append_to_node(node, value);
            } else if node_start_offset == offset {
                self.insert_content_to_node_left(value, node);
            } else if node_start_offset + piece.length > offset {
                self.insert_content_to_node_middle(value, node, remainder);
            } else {
                self.insert_content_to_node_right(value, node);
            }
        }
        self.compute_buffer_metadata();
        #[cfg(debug_assertions)]
        self.assert_invariants();
        Ok(())
    }

    /// Remove `count` bytes starting at `offset`.
    pub fn delete(&mut self, offset: usize, count: usize) -> Result<(), OutOfRange> {
        if count > self.length || offset > self.length - count {
            return Err(OutOfRange::Range {
                offset,
                count,
                len: self.length,
            });
        }
        if count == 0 {
            return Ok(());
        }

        let start_pos = self.node_at(offset);
        let end_pos = self.node_at(offset + count);
        let start_node = start_pos.node;
        let end_node = end_pos.node;

        if start_node == end_node {
            let start_split = self.position_in_buffer(start_node, start_pos.remainder);
            let end_split = self.position_in_buffer(start_node, end_pos.remainder);

            if start_pos.node_start_offset == offset {
                if count == self.nodes[start_node].piece.length {
                    let next = self.next(start_node);
                    self.rb_delete(start_node);
                    self.validate_crlf_with_prev_node(next);
                } else {
                    self.delete_node_head(start_node, end_split);
                    self.validate_crlf_with_prev_node(start_node);
                }
            } else if start_pos.node_start_offset + self.nodes[start_node].piece.length
                == offset + count
            {
                self.delete_node_tail(start_node, start_split);
                self.validate_crlf_with_next_node(start_node);
            } else {
                self.shrink_node(start_node, start_split, end_split);
            }
        } else {
            let mut nodes_to_del = Vec::new();
            let start_split = self.position_in_buffer(start_node, start_pos.remainder);
            self.delete_node_tail(start_node, start_split);
            if self.nodes[start_node].piece.length == 0 {
                nodes_to_del.push(start_node);
            }
            let end_split = self.position_in_buffer(end_node, end_pos.remainder);
            self.delete_node_head(end_node, end_split);
            if self.nodes[end_node].piece.length == 0 {
                nodes_to_del.push(end_node);
            }
            let mut node = self.next(start_node);
            while node != NIL && node != end_node {
                nodes_to_del.push(node);
                node = self.next(node);
            }
            let prev = if self.nodes[start_node].piece.length == 0 {
                self.prev(start_node)
            } else {
                start_node
            };
            self.delete_nodes(nodes_to_del);
            self.validate_crlf_with_next_node(prev);
        }

        self.compute_buffer_metadata();
        #[cfg(debug_assertions)]
        self.assert_invariants();
        Ok(())
    }

    // ---------- whole-document and per-line reads ----------

    /// The whole document as one string, terminators intact.
    pub fn get_text(&self) -> String {
        let mut out = String::with_capacity(self.length);
        self.collect_text(self.root, &mut out);
        out
    }

    /// All lines in order, terminators stripped.
    pub fn get_lines_content(&self) -> Vec<String> {
        eol::split_lines(&self.get_text())
    }

    /// Line `line` with its terminator (the last line has none).
    pub fn get_line_raw_content(&self, line: usize) -> Result<String, OutOfRange> {
        let line_count = self.line_count();
        if line >= line_count {
            return Err(OutOfRange::Line { line, line_count });
        }
        Ok(self.line_raw_content(line))
    }

    /// Line `line` without its terminator. A CRLF whose bytes came from
    /// different pieces is still stripped as a single terminator.
    pub fn get_line_content(&self, line: usize) -> Result<String, OutOfRange> {
        let mut raw = self.get_line_raw_content(line)?;
        let strip = eol::trailing_eol_len(raw.as_bytes(), 0, raw.len());
        raw.truncate(raw.len() - strip);
        Ok(raw)
    }

    /// Byte length of line `line` including its terminator.
    pub fn get_line_raw_length(&self, line: usize) -> Result<usize, OutOfRange> {
        let line_count = self.line_count();
        if line >= line_count {
            return Err(OutOfRange::Line { line, line_count });
        }
        let (_, raw, _) = self.line_extent(line);
        Ok(raw)
    }

    /// Byte length of line `line` without its terminator.
    pub fn get_line_length(&self, line: usize) -> Result<usize, OutOfRange> {
        let line_count = self.line_count();
        if line >= line_count {
            return Err(OutOfRange::Line { line, line_count });
        }
        let (_, raw, eol_len) = self.line_extent(line);
        Ok(raw - eol_len)
    }

    // ---------- navigation ----------

    /// Absolute offset of `(line, column)`. `line` is clamped to the last
    /// line and `column` to the line's raw length, so every position
    /// produced by [`Self::get_position_at`] maps back to its offset.
    pub fn get_offset_at(&self, line: usize, column: usize) -> usize {
        if self.root == NIL {
            return 0;
        }
        let line = line.min(self.line_count() - 1);
        let (start, raw, _) = self.line_extent(line);
        start + column.min(raw)
    }

    /// Position of `offset`, clamped into `[0, len]`.
    pub fn get_position_at(&self, offset: usize) -> BufferCursor {
        let mut offset = offset.min(self.length);
        let original_offset = offset;
        let mut x = self.root;
        let mut lf_cnt = 0;

        while x != NIL {
            let n = &self.nodes[x];
            if n.size_left != 0 && n.size_left >= offset {
                x = n.left;
            } else if n.size_left + n.piece.length >= offset {
                let (index, remainder) = self.get_index_of(x, offset - n.size_left);
                lf_cnt += n.lf_left + index;
                if index == 0 {
                    // the piece may start mid-line; resolve against the line start
                    let line_start = self.line_start_offset(lf_cnt);
                    return BufferCursor::new(lf_cnt, original_offset - line_start);
                }
                return BufferCursor::new(lf_cnt, remainder);
            } else {
                offset -= n.size_left + n.piece.length;
                lf_cnt += n.lf_left + n.piece.line_feed_cnt;
                if n.right == NIL {
                    let line_start = self.line_start_offset(lf_cnt);
                    return BufferCursor::new(lf_cnt, original_offset - offset - line_start);
                }
                x = n.right;
            }
        }

        BufferCursor::default()
    }

    /// The byte at `offset`.
    pub fn char_code_at(&self, offset: usize) -> Result<u8, OutOfRange> {
        if offset >= self.length {
            return Err(OutOfRange::Offset {
                offset,
                len: self.length,
            });
        }
        Ok(self.byte_at(offset))
    }

    /// The byte at `(line, column)`; `column` must fall inside the line's
    /// raw extent.
    pub fn char_code_at_position(&self, line: usize, column: usize) -> Result<u8, OutOfRange> {
        let line_count = self.line_count();
        if line >= line_count {
            return Err(OutOfRange::Line { line, line_count });
        }
        let (start, raw, _) = self.line_extent(line);
        if column >= raw {
            return Err(OutOfRange::Column { line, column });
        }
        Ok(self.byte_at(start + column))
    }

    /// Visit every piece in pre-order (node, left subtree, right subtree).
    pub fn for_each<F: FnMut(&Piece)>(&self, mut f: F) {
        if self.root == NIL {
            return;
        }
        let mut stack = vec![self.root];
        while let Some(x) = stack.pop() {
            f(&self.nodes[x].piece);
            let n = &self.nodes[x];
            if n.right != NIL {
                stack.push(n.right);
            }
            if n.left != NIL {
                stack.push(n.left);
            }
        }
    }

    // ---------- buffer-level resolution ----------

    pub(crate) fn offset_in_buffer(&self, buffer_index: usize, cursor: BufferCursor) -> usize {
        self.buffers[buffer_index].line_starts[cursor.line] + cursor.column
    }

    /// Resolve a byte offset within a node's piece to a cursor in the
    /// backing buffer, by binary search over the buffer's line starts.
    fn position_in_buffer(&self, node: NodeIdx, remainder: usize) -> BufferCursor {
        let piece = &self.nodes[node].piece;
        let line_starts = &self.buffers[piece.buffer_index].line_starts;
        let start_offset = line_starts[piece.start.line] + piece.start.column;
        let end_offset = line_starts[piece.end.line] + piece.end.column;
        let target = (start_offset + remainder).min(end_offset);

        let mut low = piece.start.line;
        let mut high = piece.end.line;
        let mut mid = low;
        while low <= high {
            mid = low + (high - low) / 2;
            if mid == high {
                break;
            }
            let mid_start = line_starts[mid];
            let mid_stop = line_starts[mid + 1];
            if target < mid_start {
                high = mid - 1;
            } else if target >= mid_stop {
                low = mid + 1;
            } else {
                break;
            }
        }

        BufferCursor::new(mid, target - line_starts[mid])
    }

    /// Terminators between two cursors of one buffer. A cursor sitting right
    /// before the `\n` of a CRLF still credits that terminator, so a piece
    /// ending between the two bytes counts the pair exactly once.
    pub(crate) fn get_line_feed_cnt(
        &self,
        buffer_index: usize,
        start: BufferCursor,
        end: BufferCursor,
    ) -> usize {
        if end.column == 0 {
            return end.line - start.line;
        }
        let line_starts = &self.buffers[buffer_index].line_starts;
        if end.line == line_starts.len() - 1 {
            // no terminator after the end cursor
            return end.line - start.line;
        }
        let next_line_start = line_starts[end.line + 1];
        let end_offset = line_starts[end.line] + end.column;
        if next_line_start > end_offset + 1 {
            return end.line - start.line;
        }
        // the byte at the end cursor is the `\n` of this line's terminator
        let buffer = &self.buffers[buffer_index].buffer;
        if end_offset > 0 && buffer.as_bytes()[end_offset - 1] == CR {
            end.line - start.line + 1
        } else {
            end.line - start.line
        }
    }

    /// Byte of the node's piece at `offset`, None when the piece cannot
    /// contain a terminator (callers only probe for CR/LF).
    fn node_char_code_at(&self, node: NodeIdx, offset: usize) -> Option<u8> {
        let piece = &self.nodes[node].piece;
        if piece.line_feed_cnt < 1 {
            return None;
        }
        let buf = &self.buffers[piece.buffer_index];
        let pos = self.offset_in_buffer(piece.buffer_index, piece.start) + offset;
        Some(buf.buffer.as_bytes()[pos])
    }

    /// Bytes from the piece's start through the end of its `index`-th line
    /// segment (through the piece's end when `index` runs past it).
    fn get_accumulated_value(&self, node: NodeIdx, index: isize) -> usize {
        if index < 0 {
            return 0;
        }
        let piece = &self.nodes[node].piece;
        let line_starts = &self.buffers[piece.buffer_index].line_starts;
        let expected = piece.start.line + index as usize + 1;
        let start_offset = line_starts[piece.start.line] + piece.start.column;
        if expected > piece.end.line {
            line_starts[piece.end.line] + piece.end.column - start_offset
        } else {
            line_starts[expected] - start_offset
        }
    }

    /// How many terminators precede `accumulated` bytes into the node's
    /// piece, and the byte remainder within the line reached.
    fn get_index_of(&self, node: NodeIdx, accumulated: usize) -> (usize, usize) {
        let piece = &self.nodes[node].piece;
        let pos = self.position_in_buffer(node, accumulated);
        let line_cnt = pos.line - piece.start.line;

        let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);
        let end_offset = self.offset_in_buffer(piece.buffer_index, piece.end);
        if end_offset - start_offset == accumulated {
            // at the very end of the piece a CRLF straddling the end cursor
            // must resolve to the line after it
            let real_line_cnt = self.get_line_feed_cnt(piece.buffer_index, piece.start, pos);
            if real_line_cnt != line_cnt {
                return (real_line_cnt, 0);
            }
        }
        (line_cnt, pos.column)
    }

    // ---------- offset resolution ----------

    /// Resolve `offset` to a node. An offset on the seam between two pieces
    /// resolves to the successor with remainder 0; only the document end
    /// resolves to the last piece with remainder equal to its length.
    fn node_at(&self, offset: usize) -> NodePosition {
        debug_assert!(self.root != NIL && offset <= self.length);
        let mut x = self.root;
        let mut off = offset;
        let mut node_start_offset = 0;

        while x != NIL {
            let n = &self.nodes[x];
            if n.size_left > off {
                x = n.left;
            } else if n.size_left + n.piece.length > off {
                node_start_offset += n.size_left;
                return NodePosition {
                    node: x,
                    remainder: off - n.size_left,
                    node_start_offset,
                };
            } else {
                off -= n.size_left + n.piece.length;
                node_start_offset += n.size_left + n.piece.length;
                x = n.right;
            }
        }

        // offset equals the document length
        let last = self.rightest(self.root);
        NodePosition {
            node: last,
            remainder: self.nodes[last].piece.length,
            node_start_offset: self.length - self.nodes[last].piece.length,
        }
    }

    fn byte_at(&self, offset: usize) -> u8 {
        let pos = self.node_at(offset);
        let piece = &self.nodes[pos.node].piece;
        let buf = &self.buffers[piece.buffer_index];
        let start = self.offset_in_buffer(piece.buffer_index, piece.start);
        buf.buffer.as_bytes()[start + pos.remainder]
    }

    /// Absolute offset of the first byte of `line` (`line < line_count`).
    fn line_start_offset(&self, mut line: usize) -> usize {
        let mut left_len = 0;
        let mut x = self.root;
        while x != NIL {
            let n = &self.nodes[x];
            if n.left != NIL && n.lf_left >= line {
                x = n.left;
            } else if n.lf_left + n.piece.line_feed_cnt >= line {
                left_len += n.size_left;
                let acc = self.get_accumulated_value(x, line as isize - n.lf_left as isize - 1);
                return left_len + acc;
            } else {
                line -= n.lf_left + n.piece.line_feed_cnt;
                left_len += n.size_left + n.piece.length;
                x = n.right;
            }
        }
        left_len
    }

    /// Start offset, raw length and terminator length of `line`.
    fn line_extent(&self, line: usize) -> (usize, usize, usize) {
        let start = self.line_start_offset(line);
        if line + 1 >= self.line_count() {
            return (start, self.length - start, 0);
        }
        let next = self.line_start_offset(line + 1);
        let raw = next - start;
        let eol_len = if next >= 2
            && next - 2 >= start
            && self.byte_at(next - 1) == LF
            && self.byte_at(next - 2) == CR
        {
            2
        } else {
            1
        };
        (start, raw, eol_len)
    }

    fn line_raw_content(&self, mut line: usize) -> String {
        let mut ret = String::new();
        let mut x = self.root;

        while x != NIL {
            let n = &self.nodes[x];
            if n.left != NIL && n.lf_left >= line {
                x = n.left;
            } else if n.lf_left + n.piece.line_feed_cnt > line {
                // the line starts and ends inside this piece
                let prev_acc = self.get_accumulated_value(x, line as isize - n.lf_left as isize - 1);
                let acc = self.get_accumulated_value(x, (line - n.lf_left) as isize);
                let start_offset = self.offset_in_buffer(n.piece.buffer_index, n.piece.start);
                let buf = &self.buffers[n.piece.buffer_index];
                ret.push_str(&buf.buffer[start_offset + prev_acc..start_offset + acc]);
                return ret;
            } else if n.lf_left + n.piece.line_feed_cnt == line {
                // the line starts here and continues into following pieces
                let prev_acc = self.get_accumulated_value(x, line as isize - n.lf_left as isize - 1);
                let start_offset = self.offset_in_buffer(n.piece.buffer_index, n.piece.start);
                let buf = &self.buffers[n.piece.buffer_index];
                ret.push_str(&buf.buffer[start_offset + prev_acc..start_offset + n.piece.length]);
                break;
            } else {
                line -= n.lf_left + n.piece.line_feed_cnt;
                x = n.right;
            }
        }
        if x == NIL {
            return ret;
        }

        // collect following pieces until one carries the line's terminator
        let mut cur = self.next(x);
        while cur != NIL {
            let n = &self.nodes[cur];
            let buf = &self.buffers[n.piece.buffer_index];
            let start_offset = self.offset_in_buffer(n.piece.buffer_index, n.piece.start);
            if n.piece.line_feed_cnt > 0 {
                let acc = self.get_accumulated_value(cur, 0);
                ret.push_str(&buf.buffer[start_offset..start_offset + acc]);
                return ret;
            }
            ret.push_str(&buf.buffer[start_offset..start_offset + n.piece.length]);
            cur = self.next(cur);
        }
        ret
    }

    fn collect_text(&self, x: NodeIdx, out: &mut String) {
        if x == NIL {
            return;
        }
        self.collect_text(self.nodes[x].left, out);
        let piece = &self.nodes[x].piece;
        let buf = &self.buffers[piece.buffer_index];
        let start = self.offset_in_buffer(piece.buffer_index, piece.start);
        let end = self.offset_in_buffer(piece.buffer_index, piece.end);
        out.push_str(&buf.buffer[start..end]);
        self.collect_text(self.nodes[x].right, out);
    }

    // ---------- added-buffer appends ----------

    fn ensure_added_buffer(&mut self) -> usize {
        match self.added {
            Some(index) => index,
            None => {
                let index = self.buffers.len();
                self.buffers.push(StringBuffer::new(String::new()));
                self.added = Some(index);
                self.last_added_pos = BufferCursor::default();
                index
            }
        }
    }

    /// Append `value` to the added buffer and return the piece covering it.
    fn create_new_piece(&mut self, value: &str) -> Piece {
        let added = self.ensure_added_buffer();
        let mut scanned = create_line_starts(value).line_starts;
        let mut start = self.last_added_pos;
        let start_offset;
        {
            let buf = &mut self.buffers[added];
            let buffer_len = buf.buffer.len();
            let last_line_start = *buf.line_starts.last().unwrap_or(&0);
            if last_line_start == buffer_len
                && buffer_len != 0
                && value.as_bytes()[0] == LF
                && buf.buffer.as_bytes()[buffer_len - 1] == CR
            {
                // the buffer's trailing \r is already tallied as a lone
                // terminator; pad with a byte so the incoming \n does not
                // fuse with it at the buffer level
                start = BufferCursor::new(self.last_added_pos.line, self.last_added_pos.column + 1);
                for ls in scanned.iter_mut() {
                    *ls += buffer_len + 1;
                }
                buf.line_starts.extend_from_slice(&scanned[1..]);
                buf.buffer.push('_');
                buf.buffer.push_str(value);
                start_offset = buffer_len + 1;
            } else {
                for ls in scanned.iter_mut() {
                    *ls += buffer_len;
                }
                buf.line_starts.extend_from_slice(&scanned[1..]);
                buf.buffer.push_str(value);
                start_offset = buffer_len;
            }
        }

        let buf = &self.buffers[added];
        let end_offset = buf.buffer.len();
        let end_index = buf.line_starts.len() - 1;
        let end = BufferCursor::new(end_index, end_offset - buf.line_starts[end_index]);
        let line_feed_cnt = self.get_line_feed_cnt(added, start, end);
        self.last_added_pos = end;
        Piece {
            buffer_index: added,
            start,
            end,
            length: end_offset - start_offset,
            line_feed_cnt,
        }
    }

    /// Grow the added-buffer tail piece in place (document-end appends).
    fn append_to_node(&mut self, node: NodeIdx, value: String) {
        let buffer_index = self.nodes[node].piece.buffer_index;
        let hit_crlf = self.should_check_crlf()
            && value.as_bytes().first() == Some(&LF)
            && self.end_with_cr_node(node);

        let start_offset = self.buffers[buffer_index].buffer.len();
        let mut scanned = create_line_starts(&value).line_starts;
        for ls in scanned.iter_mut() {
            *ls += start_offset;
        }

        {
            let buf = &mut self.buffers[buffer_index];
            buf.buffer.push_str(&value);
            if hit_crlf {
                // the buffer-level lone \r entry merges into the new CRLF
                let prev_line_start = buf.line_starts[buf.line_starts.len() - 2];
                buf.line_starts.pop();
                self.last_added_pos = BufferCursor::new(
                    self.last_added_pos.line - 1,
                    start_offset - prev_line_start,
                );
            }
            buf.line_starts.extend_from_slice(&scanned[1..]);
        }

        let buf = &self.buffers[buffer_index];
        let end_index = buf.line_starts.len() - 1;
        let new_end = BufferCursor::new(end_index, buf.buffer.len() - buf.line_starts[end_index]);
        let old = self.nodes[node].piece;
        let new_lf = self.get_line_feed_cnt(buffer_index, old.start, new_end);
        let lf_delta = new_lf as isize - old.line_feed_cnt as isize;
        self.nodes[node].piece = Piece {
            buffer_index,
            start: old.start,
            end: new_end,
            length: old.length + value.len(),
            line_feed_cnt: new_lf,
        };
        self.last_added_pos = new_end;
        self.update_tree_metadata(node, value.len() as isize, lf_delta);
    }

    // ---------- insert splices ----------

    fn insert_content_to_node_left(&mut self, mut value: String, node: NodeIdx) {
        let mut nodes_to_del = Vec::new();
        if self.should_check_crlf()
            && value.as_bytes().last() == Some(&CR)
            && self.start_with_lf_node(node)
        {
            // hand the node's leading \n over to the inserted text
            let piece = self.nodes[node].piece;
            let new_start = BufferCursor::new(piece.start.line + 1, 0);
            let new_lf = self.get_line_feed_cnt(piece.buffer_index, new_start, piece.end);
            self.nodes[node].piece = Piece {
                start: new_start,
                length: piece.length - 1,
                line_feed_cnt: new_lf,
                ..piece
            };
            value.push('\n');
            self.update_tree_metadata(node, -1, -1);
            if self.nodes[node].piece.length == 0 {
                nodes_to_del.push(node);
            }
        }
        let piece = self.create_new_piece(&value);
        let new_node = self.rb_insert_left(node, piece);
        self.validate_crlf_with_prev_node(new_node);
        self.delete_nodes(nodes_to_del);
    }

    fn insert_content_to_node_right(&mut self, mut value: String, node: NodeIdx) {
        if self.adjust_carriage_return_from_next(&value, node) {
            value.push('\n');
        }
        let piece = self.create_new_piece(&value);
        let new_node = self.rb_insert_right(node, piece);
        self.validate_crlf_with_prev_node(new_node);
    }

    fn insert_content_to_node_middle(&mut self, mut value: String, node: NodeIdx, remainder: usize) {
        let mut nodes_to_del = Vec::new();
        let piece = self.nodes[node].piece;
        let insert_pos = self.position_in_buffer(node, remainder);

        let mut new_right = Piece {
            buffer_index: piece.buffer_index,
            start: insert_pos,
            end: piece.end,
            length: self.offset_in_buffer(piece.buffer_index, piece.end)
                - self.offset_in_buffer(piece.buffer_index, insert_pos),
            line_feed_cnt: self.get_line_feed_cnt(piece.buffer_index, insert_pos, piece.end),
        };

        if self.should_check_crlf()
            && value.as_bytes().last() == Some(&CR)
            && self.node_char_code_at(node, remainder) == Some(LF)
        {
            // the right remainder starts with \n: take it into the new text
            let new_start = BufferCursor::new(new_right.start.line + 1, 0);
            new_right = Piece {
                start: new_start,
                length: new_right.length - 1,
                line_feed_cnt: self.get_line_feed_cnt(
                    new_right.buffer_index,
                    new_start,
                    new_right.end,
                ),
                ..new_right
            };
            value.push('\n');
        }

        if self.should_check_crlf()
            && value.as_bytes().first() == Some(&LF)
            && self.node_char_code_at(node, remainder - 1) == Some(CR)
        {
            // the left remainder ends with \r: take it into the new text
            let previous_pos = self.position_in_buffer(node, remainder - 1);
            self.delete_node_tail(node, previous_pos);
            value.insert(0, '\r');
            if self.nodes[node].piece.length == 0 {
                nodes_to_del.push(node);
            }
        } else {
            self.delete_node_tail(node, insert_pos);
        }

        let new_piece = self.create_new_piece(&value);
        if new_right.length > 0 {
            self.rb_insert_right(node, new_right);
        }
        self.rb_insert_right(node, new_piece);
        self.delete_nodes(nodes_to_del);
    }

    /// When `value` ends with \r and the next piece starts with \n, swallow
    /// that \n (the caller appends it to `value`) so the pair stays whole.
    fn adjust_carriage_return_from_next(&mut self, value: &str, node: NodeIdx) -> bool {
        if !self.should_check_crlf() || value.as_bytes().last() != Some(&CR) {
            return false;
        }
        let next = self.next(node);
        if next == NIL || !self.start_with_lf_node(next) {
            return false;
        }
        if self.nodes[next].piece.length == 1 {
            self.rb_delete(next);
        } else {
            let piece = self.nodes[next].piece;
            let new_start = BufferCursor::new(piece.start.line + 1, 0);
            let new_lf = self.get_line_feed_cnt(piece.buffer_index, new_start, piece.end);
            self.nodes[next].piece = Piece {
                start: new_start,
                length: piece.length - 1,
                line_feed_cnt: new_lf,
                ..piece
            };
            self.update_tree_metadata(next, -1, -1);
        }
        true
    }

    // ---------- piece trimming ----------

    fn delete_node_tail(&mut self, node: NodeIdx, pos: BufferCursor) {
        let piece = self.nodes[node].piece;
        let original_end_offset = self.offset_in_buffer(piece.buffer_index, piece.end);
        let new_end_offset = self.offset_in_buffer(piece.buffer_index, pos);
        let new_lf = self.get_line_feed_cnt(piece.buffer_index, piece.start, pos);
        let lf_delta = new_lf as isize - piece.line_feed_cnt as isize;
        let size_delta = new_end_offset as isize - original_end_offset as isize;
        self.nodes[node].piece = Piece {
            end: pos,
            length: (piece.length as isize + size_delta) as usize,
            line_feed_cnt: new_lf,
            ..piece
        };
        self.update_tree_metadata(node, size_delta, lf_delta);
    }

    fn delete_node_head(&mut self, node: NodeIdx, pos: BufferCursor) {
        let piece = self.nodes[node].piece;
        let original_start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);
        let new_start_offset = self.offset_in_buffer(piece.buffer_index, pos);
        let new_lf = self.get_line_feed_cnt(piece.buffer_index, pos, piece.end);
        let lf_delta = new_lf as isize - piece.line_feed_cnt as isize;
        let size_delta = original_start_offset as isize - new_start_offset as isize;
        self.nodes[node].piece = Piece {
            start: pos,
            length: (piece.length as isize + size_delta) as usize,
            line_feed_cnt: new_lf,
            ..piece
        };
        self.update_tree_metadata(node, size_delta, lf_delta);
    }

    /// Cut `[start, end)` out of the middle of a piece: the node keeps the
    /// head, a new node carries the tail.
    fn shrink_node(&mut self, node: NodeIdx, start: BufferCursor, end: BufferCursor) {
        let piece = self.nodes[node].piece;
        let original_end = piece.end;

        let new_length = self.offset_in_buffer(piece.buffer_index, start)
            - self.offset_in_buffer(piece.buffer_index, piece.start);
        let new_lf = self.get_line_feed_cnt(piece.buffer_index, piece.start, start);
        let size_delta = new_length as isize - piece.length as isize;
        let lf_delta = new_lf as isize - piece.line_feed_cnt as isize;
        self.nodes[node].piece = Piece {
            end: start,
            length: new_length,
            line_feed_cnt: new_lf,
            ..piece
        };
        self.update_tree_metadata(node, size_delta, lf_delta);

        let tail = Piece {
            buffer_index: piece.buffer_index,
            start: end,
            end: original_end,
            length: self.offset_in_buffer(piece.buffer_index, original_end)
                - self.offset_in_buffer(piece.buffer_index, end),
            line_feed_cnt: self.get_line_feed_cnt(piece.buffer_index, end, original_end),
        };
        let new_node = self.rb_insert_right(node, tail);
        self.validate_crlf_with_prev_node(new_node);
    }

    fn delete_nodes(&mut self, nodes: Vec<NodeIdx>) {
        for node in nodes {
            self.rb_delete(node);
        }
    }

    // ---------- CRLF seam repair ----------

    fn should_check_crlf(&self) -> bool {
        !(self.eol_normalized && self.eol == EndOfLine::Lf)
    }

    fn start_with_lf_node(&self, node: NodeIdx) -> bool {
        if node == NIL {
            return false;
        }
        let piece = &self.nodes[node].piece;
        if piece.line_feed_cnt == 0 {
            return false;
        }
        let buf = &self.buffers[piece.buffer_index];
        let line = piece.start.line;
        if line == buf.line_starts.len() - 1 {
            return false;
        }
        let start_offset = buf.line_starts[line] + piece.start.column;
        let next_line_start = buf.line_starts[line + 1];
        if next_line_start > start_offset + 1 {
            return false;
        }
        buf.buffer.as_bytes()[start_offset] == LF
    }

    fn end_with_cr_node(&self, node: NodeIdx) -> bool {
        if node == NIL {
            return false;
        }
        let piece = &self.nodes[node].piece;
        if piece.line_feed_cnt == 0 {
            return false;
        }
        self.node_char_code_at(node, piece.length - 1) == Some(CR)
    }

    fn validate_crlf_with_prev_node(&mut self, node: NodeIdx) {
        if node == NIL || !self.should_check_crlf() || !self.start_with_lf_node(node) {
            return;
        }
        let prev = self.prev(node);
        if prev != NIL && self.end_with_cr_node(prev) {
            self.fix_crlf(prev, node);
        }
    }

    fn validate_crlf_with_next_node(&mut self, node: NodeIdx) {
        if node == NIL || !self.should_check_crlf() || !self.end_with_cr_node(node) {
            return;
        }
        let next = self.next(node);
        if next != NIL && self.start_with_lf_node(next) {
            self.fix_crlf(node, next);
        }
    }

    /// `prev` ends with \r, `next` starts with \n: retract both bytes and
    /// re-materialize them as one added-buffer piece so the pair counts as a
    /// single terminator.
    fn fix_crlf(&mut self, prev: NodeIdx, next: NodeIdx) {
        let mut nodes_to_del = Vec::new();

        let prev_piece = self.nodes[prev].piece;
        let line_starts = &self.buffers[prev_piece.buffer_index].line_starts;
        let new_end = if prev_piece.end.column == 0 {
            // the piece ends right after a lone \r terminator
            BufferCursor::new(
                prev_piece.end.line - 1,
                line_starts[prev_piece.end.line] - line_starts[prev_piece.end.line - 1] - 1,
            )
        } else {
            // the \r is the first half of a buffer-level CRLF
            BufferCursor::new(prev_piece.end.line, prev_piece.end.column - 1)
        };
        self.nodes[prev].piece = Piece {
            end: new_end,
            length: prev_piece.length - 1,
            line_feed_cnt: prev_piece.line_feed_cnt - 1,
            ..prev_piece
        };
        self.update_tree_metadata(prev, -1, -1);
        if self.nodes[prev].piece.length == 0 {
            nodes_to_del.push(prev);
        }

        let next_piece = self.nodes[next].piece;
        if next_piece.length == 1 {
            nodes_to_del.push(next);
        } else {
            let new_start = BufferCursor::new(next_piece.start.line + 1, 0);
            let new_lf = self.get_line_feed_cnt(next_piece.buffer_index, new_start, next_piece.end);
            self.nodes[next].piece = Piece {
                start: new_start,
                length: next_piece.length - 1,
                line_feed_cnt: new_lf,
                ..next_piece
            };
            self.update_tree_metadata(next, -1, -1);
        }

        let crlf = self.create_new_piece("\r\n");
        self.rb_insert_right(prev, crlf);
        self.delete_nodes(nodes_to_del);
    }

    // ---------- cached totals ----------

    pub(crate) fn compute_buffer_metadata(&mut self) {
        let mut x = self.root;
        let mut lf = 0;
        let mut len = 0;
        while x != NIL {
            lf += self.nodes[x].lf_left + self.nodes[x].piece.line_feed_cnt;
            len += self.nodes[x].size_left + self.nodes[x].piece.length;
            x = self.nodes[x].right;
        }
        self.line_feed_cnt = lf;
        self.length = len;
    }
}
