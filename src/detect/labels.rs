//! Detector label set.
//!
//! The pretrained YOLOv8 weights are trained on COCO, so class indices map
//! onto the 80 COCO names below.

pub const COCO_LABELS: [&str; 80] = [
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

/// COCO classes that are animals. Default species filter for sightings.
pub const ANIMAL_LABELS: [&str; 10] = [
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe",
];

pub fn label_for(class_id: usize) -> Option<&'static str> {
    COCO_LABELS.get(class_id).copied()
}

/// Species label as shown to farmers: first letter upper, rest lower.
pub fn display_species(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn animal_labels_are_coco_labels() {
        for label in ANIMAL_LABELS {
            assert!(COCO_LABELS.contains(&label), "{label} missing");
        }
    }

    #[test]
    fn display_species_capitalizes() {
        assert_eq!(display_species("cow"), "Cow");
        assert_eq!(display_species("teddy BEAR"), "Teddy bear");
        assert_eq!(display_species(""), "");
    }
}
