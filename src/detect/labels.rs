/// COCO class names in YOLOv8 output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Look up a class id by (case-insensitive) name.
pub fn class_id_for_name(name: &str) -> Option<usize> {
    let name = name.trim();
    COCO_CLASSES
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(name))
}

/// Display label for a class id, uppercased for the overlay.
pub fn class_label(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|name| name.to_uppercase())
        .unwrap_or_else(|| format!("CLASS {}", class_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_is_class_zero() {
        assert_eq!(class_id_for_name("Person"), Some(0));
        assert_eq!(class_label(0), "PERSON");
    }

    #[test]
    fn unknown_names_and_ids() {
        assert_eq!(class_id_for_name("unicorn"), None);
        assert_eq!(class_label(999), "CLASS 999");
    }
}
